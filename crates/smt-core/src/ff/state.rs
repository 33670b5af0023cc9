use crate::vocab::WordId;

/// Per-feature dynamic-programming state carried by a hypothesis.
///
/// Two hypotheses recombine only if every state in their vectors compares
/// equal, so equality here must mean "indistinguishable to the feature for the
/// rest of the search".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DpState {
    /// Handle into a native language model's sentence pool.
    Native(NativeState),
    /// Explicit right-context words.
    Ngram(NgramState),
}

/// Opaque state handle returned by the native scorer. The scorer interns
/// states within a pool, so handle equality is state equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeState(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NgramState {
    pub context: Vec<WordId>,
}
