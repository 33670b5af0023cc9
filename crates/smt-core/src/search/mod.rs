//! Sentence-level search.
//!
//! - `SearchStrategy` is the seam between the decoder and an algorithm
//! - `decode_sentence` owns the per-sentence scope: it is created before the
//!   search starts and dropped only after derivations are extracted
//! - `extract` turns the best path through a hypothesis arena into output

mod future;
mod stack;

use thiserror::Error;
use tracing::{debug, debug_span};

use crate::ff::{EdgeContext, FeatureError};
use crate::hypothesis::{Hypothesis, NodeId};
use crate::lm::SentenceScope;
use crate::model::Model;
use crate::rule::{RuleKind, Symbol};
use crate::sentence::{Sentence, SourceSentence};
use crate::vocab::{WordId, START_ID, STOP_ID};
use crate::weights::FeatureVector;

pub use future::FutureCosts;
pub use stack::StackSearch;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("no complete derivation for sentence {0}")]
    NoDerivation(u32),
    #[error("a regular rule produced no feature state")]
    MissingState,
    #[error(transparent)]
    Feature(#[from] FeatureError),
}

/// One complete translation: target text, unweighted features, model score.
#[derive(Debug, Clone)]
pub struct Derivation {
    pub target: String,
    pub features: FeatureVector,
    pub score: f32,
}

/// A search algorithm over one sentence.
///
/// Implementations must do all their feature scoring and extraction while
/// `scope` is alive; native states are invalid once it is dropped.
pub trait SearchStrategy: Send + Sync {
    fn search(
        &self,
        model: &Model,
        sentence: &SourceSentence,
        scope: &SentenceScope,
    ) -> Result<Vec<Derivation>, SearchError>;
}

/// Decode one sentence: intern it, search, extract, release its pools.
pub fn decode_sentence(
    model: &Model,
    strategy: &dyn SearchStrategy,
    sentence: &Sentence,
) -> Result<Vec<Derivation>, SearchError> {
    let source = SourceSentence::intern(sentence, &model.vocab);
    let _span = debug_span!("decode_sentence", id = source.id(), words = source.num_words()).entered();
    let scope = SentenceScope::new(source.id(), model.features.num_stateful());
    let derivations = strategy.search(model, &source, &scope)?;
    debug!(derivations = derivations.len(), pools = scope.live_pools(), "search finished");
    drop(scope);
    Ok(derivations)
}

/// Follow best edges down from `goal` and rebuild target text and features.
pub fn extract(
    nodes: &[Hypothesis],
    goal: NodeId,
    model: &Model,
    sentence: &SourceSentence,
    scope: &SentenceScope,
) -> Result<Derivation, SearchError> {
    let mut words = Vec::new();
    let mut features = FeatureVector::new();
    collect(nodes, goal, model, sentence, scope, &mut words, &mut features)?;
    Ok(Derivation {
        target: model.vocab.words(&words),
        features,
        score: nodes[goal].score(),
    })
}

fn collect(
    nodes: &[Hypothesis],
    id: NodeId,
    model: &Model,
    sentence: &SourceSentence,
    scope: &SentenceScope,
    words: &mut Vec<WordId>,
    features: &mut FeatureVector,
) -> Result<(), SearchError> {
    let edge = nodes[id].best_edge();
    match edge.rule.kind() {
        RuleKind::Begin => {}
        RuleKind::End => {
            let tail = &nodes[edge.tails[0]];
            features.merge(&model.features.final_features(tail, sentence, scope)?);
        }
        RuleKind::Regular => {
            let tails: Vec<&Hypothesis> = edge.tails.iter().map(|&t| &nodes[t]).collect();
            let context = EdgeContext {
                rule: &edge.rule,
                tails: &tails,
                span: edge.span,
                sentence,
                scope,
            };
            features.merge(&model.features.edge_features(&context)?);
        }
    }
    for symbol in edge.rule.target() {
        match *symbol {
            Symbol::Word(w) if w == START_ID || w == STOP_ID => {}
            Symbol::Word(w) => words.push(w),
            Symbol::Gap { index, .. } => {
                collect(nodes, edge.tails[index], model, sentence, scope, words, features)?;
            }
        }
    }
    Ok(())
}
