//! Everything a search needs that outlives a single sentence.

use std::sync::Arc;

use tracing::debug;

use crate::ff::FeatureSet;
use crate::grammar::Grammar;
use crate::rule::{bracket, Rule};
use crate::settings::DecoderConfig;
use crate::vocab::{Vocabulary, WordId};
use crate::weights::Weights;

/// Shared, read-mostly decoding model. Weights and grammars may change
/// between sentences through directives; everything else is fixed.
pub struct Model {
    pub config: Arc<DecoderConfig>,
    pub vocab: Arc<Vocabulary>,
    pub weights: Arc<Weights>,
    pub features: Arc<FeatureSet>,
    pub grammars: Vec<Arc<dyn Grammar>>,
    nonterminal: WordId,
    begin: Arc<Rule>,
    end: Arc<Rule>,
}

impl Model {
    pub fn new(
        config: Arc<DecoderConfig>,
        vocab: Arc<Vocabulary>,
        weights: Arc<Weights>,
        features: Arc<FeatureSet>,
        grammars: Vec<Arc<dyn Grammar>>,
    ) -> Self {
        let label = &config.default_non_terminal;
        let nonterminal = vocab.id(&bracket(label));
        let begin = Arc::new(Rule::begin(&vocab, label));
        let end = Arc::new(Rule::end(&vocab, label));
        Self {
            config,
            vocab,
            weights,
            features,
            grammars,
            nonterminal,
            begin,
            end,
        }
    }

    /// Id of the bracketed default nonterminal, e.g. `[X]`.
    pub fn nonterminal(&self) -> WordId {
        self.nonterminal
    }

    pub fn begin_rule(&self) -> &Arc<Rule> {
        &self.begin
    }

    pub fn end_rule(&self) -> &Arc<Rule> {
        &self.end
    }

    /// Attach the context-free estimate to every grammar rule. Rules keep
    /// the first estimate they get, so call this after the weights are final
    /// for loading.
    pub fn estimate_grammars(&self) {
        let mut rules = 0usize;
        for grammar in &self.grammars {
            for rule in grammar.rules() {
                rule.estimate_cost(&self.features, &self.weights);
                rules += 1;
            }
        }
        debug!(rules, grammars = self.grammars.len(), "estimated rule costs");
    }
}
