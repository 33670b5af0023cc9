//! Inline directives: runtime edits to weights and the custom grammar.
//!
//! A directive that cannot be parsed or applied is logged and dropped; the
//! sentence it rides on is translated regardless.

use std::sync::Arc;

use serde::Serialize;
use smt_core::grammar::{Grammar, MemoryGrammar};
use smt_core::model::Model;
use smt_core::rule::{Rule, Symbol, CUSTOM_OWNER};
use smt_core::sentence::{Directive, Metadata};
use smt_core::settings::SearchAlgorithm;
use tracing::{info, warn};

#[derive(Serialize)]
struct RuleList {
    rules: Vec<String>,
}

/// Applies directives against the shared model.
#[derive(Clone)]
pub struct Directives {
    model: Arc<Model>,
    custom: Arc<MemoryGrammar>,
}

impl Directives {
    pub fn new(model: Arc<Model>, custom: Arc<MemoryGrammar>) -> Self {
        Self { model, custom }
    }

    /// Apply one directive. `list_rules` answers with JSON; everything else
    /// answers with nothing.
    pub fn apply(&self, meta: &Metadata) -> Option<serde_json::Value> {
        let directive = match meta.parse() {
            Ok(d) => d,
            Err(e) => {
                warn!(kind = meta.kind(), args = meta.args(), error = %e, "ignoring directive");
                return None;
            }
        };
        match directive {
            Directive::SetWeights(pairs) => {
                self.set_weights(&pairs);
                None
            }
            Directive::AddRule {
                source,
                target,
                features,
            } => {
                self.add_rule(&source, &target, &features);
                None
            }
            Directive::ListRules => Some(self.list_rules()),
            Directive::RemoveRule { source, target } => {
                self.remove_rule(&source, &target);
                None
            }
        }
    }

    fn set_weights(&self, pairs: &[(String, f32)]) {
        let convention = self.model.config.name_convention();
        for (name, value) in pairs {
            let name = convention.to_internal(name);
            let old = self.model.weights.set(&name, *value);
            info!(feature = %name, old, new = value, "set weight");
        }
    }

    fn uses_gaps(&self) -> bool {
        self.model.config.search_algorithm == SearchAlgorithm::Stack
    }

    fn add_rule(&self, source: &str, target: &str, features: &str) {
        let label = &self.model.config.default_non_terminal;
        let line = if self.uses_gaps() {
            format!("[{label}] ||| [{label},1] {source} ||| [{label},1] {target} ||| custom=1 {features}")
        } else {
            format!("[{label}] ||| {source} ||| {target} ||| custom=1 {features}")
        };
        match Rule::parse(&line, CUSTOM_OWNER, &self.model.vocab) {
            Ok(rule) => {
                rule.estimate_cost(&self.model.features, &self.model.weights);
                info!(rule = %rule.display(&self.model.vocab), "added custom rule");
                self.custom.add_rule(Arc::new(rule));
            }
            Err(e) => warn!(line = %line, error = %e, "cannot add rule"),
        }
    }

    fn list_rules(&self) -> serde_json::Value {
        let vocab = &self.model.vocab;
        let rules: Vec<String> = self.custom.rules().iter().map(|r| r.display(vocab)).collect();
        info!(rules = rules.len(), "listing custom rules");
        serde_json::to_value(RuleList { rules }).unwrap_or_default()
    }

    fn remove_rule(&self, source: &str, target: &str) {
        let vocab = &self.model.vocab;
        let mut key = Vec::new();
        if self.uses_gaps() {
            key.push(Symbol::Gap {
                label: self.model.nonterminal(),
                index: 0,
            });
        }
        key.extend(source.split_whitespace().map(|w| Symbol::Word(vocab.id(w))));
        let target = target.split_whitespace().collect::<Vec<_>>().join(" ");
        match self.custom.remove_rule(&key, |r| r.target_text(vocab) == target) {
            Some(rule) => info!(rule = %rule.display(vocab), "removed custom rule"),
            None => warn!(source, target = %target, "no such custom rule"),
        }
    }
}
