//! Feature functions.
//!
//! A feature scores a rule application (an edge) and, when stateful, derives a
//! new DP state from the states of the edge's tail nodes. Features are
//! registered once; registration fixes every dense slot and every state index
//! before the first edge is scored.

mod accumulator;
mod distortion;
mod penalties;
mod phrase_model;
mod state;

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::hypothesis::Hypothesis;
use crate::lm::{LanguageModel, LmLoader, NgramBackend, SentenceScope, StateMinimizingLanguageModel};
use crate::rule::Rule;
use crate::sentence::SourceSentence;
use crate::settings::{ConfigError, DecoderConfig};
use crate::vocab::Vocabulary;
use crate::weights::{DenseFeatures, FeatureVector, Weights};

pub use accumulator::{Accumulator, FeatureAccumulator, ScoreAccumulator};
pub use distortion::Distortion;
pub use penalties::{OovPenalty, PhrasePenalty, WordPenalty};
pub use phrase_model::PhraseModel;
pub use state::{DpState, NativeState, NgramState};

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// Everything a feature may look at when scoring one edge.
pub struct EdgeContext<'a> {
    pub rule: &'a Rule,
    pub tails: &'a [&'a Hypothesis],
    /// Source span `[i, j)` consumed by the rule.
    pub span: (usize, usize),
    pub sentence: &'a SourceSentence,
    pub scope: &'a SentenceScope,
}

impl<'a> EdgeContext<'a> {
    /// DP state `index` of tail `tail`.
    pub fn tail_state(&self, feature: &str, tail: usize, index: usize) -> Result<&'a DpState, FeatureError> {
        self.tails
            .get(tail)
            .and_then(|t| t.dp_state(index))
            .ok_or_else(|| FeatureError::MissingTailState {
                feature: feature.to_string(),
                tail,
                index,
            })
    }
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("{feature}: tail {tail} has no state at index {index}")]
    MissingTailState {
        feature: String,
        tail: usize,
        index: usize,
    },
    #[error("{feature}: unexpected state kind at index {index}")]
    WrongStateKind { feature: String, index: usize },
    #[error("{feature}: sentence scope has no pool slot {index}")]
    NoPool { feature: String, index: usize },
    #[error("{feature} is stateful but produced no state")]
    NoState { feature: String },
}

pub trait FeatureFunction: Send + Sync {
    fn name(&self) -> &str;

    /// Claim dense slots starting at `first_slot`; returns their names.
    fn bind_dense(&mut self, first_slot: usize) -> Vec<String>;

    fn is_stateful(&self) -> bool {
        false
    }

    /// Index of this feature's state in every hypothesis' state vector.
    fn bind_state(&mut self, _index: usize) {}

    /// Sentence-initial state of a stateful feature.
    fn initial_state(
        &self,
        _sentence: &SourceSentence,
        _scope: &SentenceScope,
    ) -> Result<Option<DpState>, FeatureError> {
        Ok(None)
    }

    /// Score one edge; stateful features return the new state.
    fn compute(&self, edge: &EdgeContext<'_>, acc: &mut dyn Accumulator) -> Result<Option<DpState>, FeatureError>;

    /// Close a complete derivation (end-of-sentence costs).
    fn compute_final(
        &self,
        _tail: &Hypothesis,
        _sentence: &SourceSentence,
        _scope: &SentenceScope,
        _acc: &mut dyn Accumulator,
    ) -> Result<Option<DpState>, FeatureError> {
        Ok(None)
    }

    /// Context-free estimate of what `rule` will cost.
    fn estimate_cost(&self, _rule: &Rule, _acc: &mut dyn Accumulator) {}

    /// Estimate of the cost still to come given a partial state.
    fn estimate_future_cost(&self, _rule: &Rule, _state: Option<&DpState>, _acc: &mut dyn Accumulator) {}
}

// ---------------------------------------------------------------------------
// Registered feature set
// ---------------------------------------------------------------------------

/// Weighted score of one edge plus the states it produced.
#[derive(Debug, Clone)]
pub struct EdgeScore {
    pub score: f32,
    pub states: Vec<DpState>,
}

pub struct FeatureSet {
    features: Vec<Box<dyn FeatureFunction>>,
    dense: Arc<DenseFeatures>,
    num_stateful: usize,
}

impl FeatureSet {
    /// Assign dense slots and state indices in list order.
    pub fn register(mut features: Vec<Box<dyn FeatureFunction>>) -> Result<Self, ConfigError> {
        let mut names: Vec<String> = Vec::new();
        let mut num_stateful = 0;
        for ff in features.iter_mut() {
            let first_slot = names.len();
            let dense = ff.bind_dense(first_slot);
            debug!(feature = ff.name(), first_slot, slots = dense.len(), stateful = ff.is_stateful(), "registered feature");
            names.extend(dense);
            if ff.is_stateful() {
                ff.bind_state(num_stateful);
                num_stateful += 1;
            }
        }
        Ok(Self {
            features,
            dense: Arc::new(DenseFeatures::new(names)?),
            num_stateful,
        })
    }

    pub fn dense_features(&self) -> &Arc<DenseFeatures> {
        &self.dense
    }

    pub fn num_stateful(&self) -> usize {
        self.num_stateful
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|ff| ff.name())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn initial_states(&self, sentence: &SourceSentence, scope: &SentenceScope) -> Result<Vec<DpState>, FeatureError> {
        let mut states = Vec::with_capacity(self.num_stateful);
        for ff in self.features.iter().filter(|ff| ff.is_stateful()) {
            let state = ff.initial_state(sentence, scope)?;
            states.push(state.ok_or_else(|| no_state(ff.as_ref()))?);
        }
        Ok(states)
    }

    pub fn score_edge(&self, edge: &EdgeContext<'_>, weights: &Weights) -> Result<EdgeScore, FeatureError> {
        let mut acc = ScoreAccumulator::new(weights);
        let states = self.run_edge(edge, &mut acc)?;
        Ok(EdgeScore {
            score: acc.score(),
            states,
        })
    }

    /// Unweighted contributions of one edge.
    pub fn edge_features(&self, edge: &EdgeContext<'_>) -> Result<FeatureVector, FeatureError> {
        let mut acc = FeatureAccumulator::new(Arc::clone(&self.dense));
        self.run_edge(edge, &mut acc)?;
        Ok(acc.into_features())
    }

    pub fn score_final(
        &self,
        tail: &Hypothesis,
        sentence: &SourceSentence,
        scope: &SentenceScope,
        weights: &Weights,
    ) -> Result<EdgeScore, FeatureError> {
        let mut acc = ScoreAccumulator::new(weights);
        let states = self.run_final(tail, sentence, scope, &mut acc)?;
        Ok(EdgeScore {
            score: acc.score(),
            states,
        })
    }

    pub fn final_features(
        &self,
        tail: &Hypothesis,
        sentence: &SourceSentence,
        scope: &SentenceScope,
    ) -> Result<FeatureVector, FeatureError> {
        let mut acc = FeatureAccumulator::new(Arc::clone(&self.dense));
        self.run_final(tail, sentence, scope, &mut acc)?;
        Ok(acc.into_features())
    }

    pub fn estimate_rule(&self, rule: &Rule, weights: &Weights) -> f32 {
        let mut acc = ScoreAccumulator::new(weights);
        for ff in &self.features {
            ff.estimate_cost(rule, &mut acc);
        }
        acc.score()
    }

    pub fn estimate_future(&self, rule: &Rule, states: Option<&[DpState]>, weights: &Weights) -> f32 {
        let mut acc = ScoreAccumulator::new(weights);
        let mut index = 0;
        for ff in &self.features {
            let state = if ff.is_stateful() {
                index += 1;
                states.and_then(|s| s.get(index - 1))
            } else {
                None
            };
            ff.estimate_future_cost(rule, state, &mut acc);
        }
        acc.score()
    }

    fn run_edge(&self, edge: &EdgeContext<'_>, acc: &mut dyn Accumulator) -> Result<Vec<DpState>, FeatureError> {
        let mut states = Vec::with_capacity(self.num_stateful);
        for ff in &self.features {
            let state = ff.compute(edge, acc)?;
            if ff.is_stateful() {
                states.push(state.ok_or_else(|| no_state(ff.as_ref()))?);
            }
        }
        Ok(states)
    }

    fn run_final(
        &self,
        tail: &Hypothesis,
        sentence: &SourceSentence,
        scope: &SentenceScope,
        acc: &mut dyn Accumulator,
    ) -> Result<Vec<DpState>, FeatureError> {
        let mut states = Vec::with_capacity(self.num_stateful);
        for ff in &self.features {
            let state = ff.compute_final(tail, sentence, scope, acc)?;
            if ff.is_stateful() {
                states.push(state.ok_or_else(|| no_state(ff.as_ref()))?);
            }
        }
        Ok(states)
    }
}

fn no_state(ff: &dyn FeatureFunction) -> FeatureError {
    FeatureError::NoState {
        feature: ff.name().to_string(),
    }
}

// ---------------------------------------------------------------------------
// Construction from feature lines
// ---------------------------------------------------------------------------

/// A feature line `Name -key value -flag ...`.
#[derive(Debug, Clone)]
pub struct FeatureArgs {
    line: String,
    name: String,
    args: HashMap<String, String>,
}

impl FeatureArgs {
    pub fn parse(line: &str) -> Result<Self, ConfigError> {
        let mut tokens = line.split_whitespace().peekable();
        let name = tokens
            .next()
            .ok_or_else(|| ConfigError::UnknownFeature(line.to_string()))?
            .to_string();
        let mut args = HashMap::new();
        while let Some(token) = tokens.next() {
            let key = token.strip_prefix('-').ok_or_else(|| ConfigError::InvalidValue {
                field: name.clone(),
                reason: format!("expected `-key value`, found {token:?}"),
            })?;
            let value = match tokens.peek() {
                Some(next) if !next.starts_with('-') || next.parse::<f64>().is_ok() => {
                    tokens.next().unwrap_or_default().to_string()
                }
                _ => "true".to_string(),
            };
            args.insert(key.to_string(), value);
        }
        Ok(Self {
            line: line.to_string(),
            name,
            args,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::InvalidValue {
            field: format!("{} -{key}", self.name),
            reason: "required".to_string(),
        })
    }

    pub fn parse_value<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.get(key)
            .map(|v| {
                v.parse().map_err(|_| ConfigError::InvalidValue {
                    field: format!("{} -{key}", self.name),
                    reason: format!("cannot parse {v:?}"),
                })
            })
            .transpose()
    }
}

/// Builds features from configuration lines.
pub struct FeatureFactory<'a> {
    config: &'a DecoderConfig,
    vocab: &'a Arc<Vocabulary>,
    lm_loader: &'a dyn LmLoader,
    next_lm: usize,
}

impl<'a> FeatureFactory<'a> {
    pub fn new(config: &'a DecoderConfig, vocab: &'a Arc<Vocabulary>, lm_loader: &'a dyn LmLoader) -> Self {
        Self {
            config,
            vocab,
            lm_loader,
            next_lm: 0,
        }
    }

    pub fn build(&mut self, line: &str) -> Result<Box<dyn FeatureFunction>, ConfigError> {
        let args = FeatureArgs::parse(line)?;
        let ff: Box<dyn FeatureFunction> = match args.name() {
            "Distortion" => Box::new(Distortion::new(self.config.search_algorithm)?),
            "WordPenalty" => Box::new(WordPenalty::new()),
            "PhrasePenalty" => Box::new(PhrasePenalty::from_args(&args)?),
            "OOVPenalty" => Box::new(OovPenalty::from_args(&args)?),
            "StateMinimizingLanguageModel" => {
                let backend = self.load_lm(&args)?;
                Box::new(StateMinimizingLanguageModel::new(self.lm_index(), backend))
            }
            "LanguageModel" => {
                let backend = self.load_lm(&args)?;
                Box::new(LanguageModel::new(self.lm_index(), backend))
            }
            _ => return Err(ConfigError::UnknownFeature(line.to_string())),
        };
        Ok(ff)
    }

    fn lm_index(&mut self) -> usize {
        self.next_lm += 1;
        self.next_lm - 1
    }

    fn load_lm(&self, args: &FeatureArgs) -> Result<Arc<dyn NgramBackend>, ConfigError> {
        if let Some(lm_type) = args.get("lm_type") {
            if lm_type != "kenlm" {
                return Err(ConfigError::InvalidValue {
                    field: format!("{} -lm_type", args.name()),
                    reason: format!("{lm_type:?} is not supported, only \"kenlm\""),
                });
            }
        }
        let path = args.require("lm_file")?;
        let order: Option<usize> = args.parse_value("lm_order")?;
        let backend = self.lm_loader.load(Path::new(path))?;
        if let Some(order) = order {
            if order != backend.order() {
                warn!(configured = order, model = backend.order(), path, "language model order differs from configuration");
            }
        }
        self.vocab.register_language_model(Arc::clone(&backend));
        Ok(backend)
    }
}

#[cfg(test)]
mod tests;
