use super::{Accumulator, DpState, EdgeContext, FeatureError, FeatureFunction};
use crate::rule::Rule;

/// Translation-model scores of one grammar.
///
/// Unlabelled rule scores become the dense features `tm_<owner>_<i>`;
/// labelled ones are passed through by name.
pub struct PhraseModel {
    name: String,
    owner: String,
    num_dense: usize,
    first_slot: usize,
}

impl PhraseModel {
    pub fn new(owner: &str, num_dense: usize) -> Self {
        Self {
            name: format!("tm_{owner}"),
            owner: owner.to_string(),
            num_dense,
            first_slot: 0,
        }
    }

    fn score(&self, rule: &Rule, acc: &mut dyn Accumulator) {
        if rule.owner() != self.owner {
            return;
        }
        let prefix = format!("{}_", self.name);
        for (name, value) in rule.features() {
            let dense = name
                .strip_prefix(&prefix)
                .and_then(|i| i.parse::<usize>().ok())
                .filter(|&i| i < self.num_dense);
            match dense {
                Some(i) => acc.add_dense(self.first_slot + i, *value),
                None => acc.add_sparse(name, *value),
            }
        }
    }
}

impl FeatureFunction for PhraseModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind_dense(&mut self, first_slot: usize) -> Vec<String> {
        self.first_slot = first_slot;
        (0..self.num_dense).map(|i| format!("{}_{i}", self.name)).collect()
    }

    fn compute(&self, edge: &EdgeContext<'_>, acc: &mut dyn Accumulator) -> Result<Option<DpState>, FeatureError> {
        self.score(edge.rule, acc);
        Ok(None)
    }

    fn estimate_cost(&self, rule: &Rule, acc: &mut dyn Accumulator) {
        self.score(rule, acc);
    }
}
