//! N-gram language models.
//!
//! The scoring itself lives behind [`NgramBackend`], normally a compiled
//! KenLM-style library loaded at run time (see [`KenLm`]). Two features sit on
//! top of a backend: [`StateMinimizingLanguageModel`], which keeps opaque
//! native states in per-sentence pools, and [`LanguageModel`], which keeps
//! explicit word histories.

mod native;
mod ngram;
mod pool;
mod state_minimizing;
#[cfg(test)]
pub(crate) mod testutil;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::ff::NativeState;
use crate::vocab::WordId;

pub use native::KenLm;
pub use ngram::LanguageModel;
pub use pool::{MemoryPool, PoolHandle, SentenceScope};
pub use state_minimizing::StateMinimizingLanguageModel;

/// Marks a nonterminal position in a rule passed to
/// [`NgramBackend::estimate_rule`].
pub const GAP_SENTINEL: i64 = -1;

/// How a tail state appears in a rule array passed to
/// [`NgramBackend::prob_rule`]: `-(handle + 1)`, so handle 0 stays distinct
/// from every word id.
pub fn state_ref(state: NativeState) -> i64 {
    -(state.0 as i64) - 1
}

/// Inverse of [`state_ref`]; `None` for word ids.
pub fn state_of_ref(word: i64) -> Option<NativeState> {
    (word < 0).then(|| NativeState((-(word + 1)) as u64))
}

/// Result of scoring a rule against tail states.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateProb {
    pub state: NativeState,
    /// Log10 probability added by the rule.
    pub prob: f32,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no language-model library configured; set `lm_library` to the compiled scorer")]
    NoLibrary,
    #[error("cannot load language-model library {path}: {reason}")]
    Library { path: PathBuf, reason: String },
    #[error("language-model library {path} does not export `{symbol}`; rebuild it against this decoder")]
    MissingSymbol { path: PathBuf, symbol: String },
    #[error("the scorer failed to load language model {0}; check the path and file format")]
    ModelLoad(PathBuf),
    #[error("language model path {0} cannot be passed to the scorer")]
    BadPath(PathBuf),
}

/// The contract of a native n-gram scorer.
///
/// Rule arrays mix our word ids (non-negative) with references to tail
/// states (see [`state_ref`]). Pools own every state created while scoring
/// one sentence.
pub trait NgramBackend: Send + Sync {
    fn order(&self) -> usize;

    /// Map our id for `word` into the model; returns whether the model knows
    /// the word.
    fn register_word(&self, word: &str, id: WordId) -> bool;

    /// Log10 probability of the last word of `ngram` given the others.
    fn prob(&self, ngram: &[WordId]) -> f32;

    /// Score a rule's target side, returning the left-state-minimised state
    /// and the incremental probability.
    fn prob_rule(&self, pool: PoolHandle, words: &[i64]) -> StateProb;

    /// Context-free estimate of a rule; gaps are [`GAP_SENTINEL`].
    fn estimate_rule(&self, words: &[i64]) -> f32;

    fn create_pool(&self) -> PoolHandle;

    fn destroy_pool(&self, pool: PoolHandle);

    /// Log10 probability of `words[start..]`, each word conditioned on at
    /// most `order - 1` predecessors. Words before `start` are context only.
    fn sequence_prob(&self, words: &[WordId], start: usize) -> f32 {
        let order = self.order().max(1);
        (start..words.len())
            .map(|i| self.prob(&words[(i + 1).saturating_sub(order)..=i]))
            .sum()
    }
}

/// Opens language models named by feature lines.
pub trait LmLoader: Send + Sync {
    fn load(&self, model: &Path) -> Result<Arc<dyn NgramBackend>, BackendError>;
}

impl<F> LmLoader for F
where
    F: Fn(&Path) -> Result<Arc<dyn NgramBackend>, BackendError> + Send + Sync,
{
    fn load(&self, model: &Path) -> Result<Arc<dyn NgramBackend>, BackendError> {
        self(model)
    }
}

/// Loads models through the configured native library.
pub struct NativeLoader {
    library: Option<PathBuf>,
}

impl NativeLoader {
    pub fn new(library: Option<PathBuf>) -> Self {
        Self { library }
    }
}

impl LmLoader for NativeLoader {
    fn load(&self, model: &Path) -> Result<Arc<dyn NgramBackend>, BackendError> {
        let library = self.library.as_deref().ok_or(BackendError::NoLibrary)?;
        Ok(Arc::new(KenLm::load(library, model)?))
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::ToyBackend;
    use super::*;
    use crate::vocab::Vocabulary;

    #[test]
    fn test_native_loader_without_library() {
        let loader = NativeLoader::new(None);
        assert!(matches!(loader.load(Path::new("lm.arpa")), Err(BackendError::NoLibrary)));
    }

    #[test]
    fn test_native_loader_missing_library() {
        let loader = NativeLoader::new(Some("/nonexistent/libsmtlm.so".into()));
        let err = loader.load(Path::new("lm.arpa")).err().unwrap();
        assert!(matches!(err, BackendError::Library { .. }));
        assert!(err.to_string().contains("/nonexistent/libsmtlm.so"));
    }

    #[test]
    fn test_sequence_prob_uses_bounded_context() {
        let vocab = Vocabulary::new();
        let lm = Arc::new(ToyBackend::with_ngrams(2, &[("a", -1.0), ("a b", -0.5), ("b", -2.0)]));
        vocab.register_language_model(lm.clone());
        let (a, b) = (vocab.id("a"), vocab.id("b"));
        assert_eq!(lm.sequence_prob(&[a, b], 0), -1.5);
        assert_eq!(lm.sequence_prob(&[b, b], 0), -4.0);
        // context words are not scored themselves
        assert_eq!(lm.sequence_prob(&[a, b], 1), -0.5);
        assert_eq!(lm.sequence_prob(&[a, b], 2), 0.0);
        assert_eq!(lm.sequence_calls(), 4);
    }

    #[test]
    fn test_state_refs_never_collide_with_words() {
        assert_eq!(state_ref(NativeState(0)), -1);
        assert_eq!(state_ref(NativeState(41)), -42);
        assert_eq!(state_of_ref(state_ref(NativeState(0))), Some(NativeState(0)));
        assert_eq!(state_of_ref(0), None);
        assert_eq!(state_of_ref(crate::vocab::UNKNOWN_ID as i64), None);
    }

    #[test]
    fn test_closure_loader() {
        let loader = |_: &Path| -> Result<Arc<dyn NgramBackend>, BackendError> { Ok(Arc::new(ToyBackend::new(3))) };
        assert_eq!(loader.load(Path::new("x")).unwrap().order(), 3);
    }
}
