use std::sync::Arc;

use super::{state_ref, NgramBackend, PoolHandle, GAP_SENTINEL};
use crate::ff::{Accumulator, DpState, EdgeContext, FeatureError, FeatureFunction};
use crate::hypothesis::Hypothesis;
use crate::lm::SentenceScope;
use crate::rule::{Rule, Symbol};
use crate::sentence::SourceSentence;
use crate::vocab::{START_ID, STOP_ID};

/// Language model whose DP state is a native, left-state-minimised handle.
///
/// A rule's target side is sent to the scorer as one array; each gap is
/// replaced by a reference to the state of the tail that fills it (see
/// [`state_ref`]). States live in the sentence's pool.
pub struct StateMinimizingLanguageModel {
    name: String,
    backend: Arc<dyn NgramBackend>,
    slot: usize,
    state_index: usize,
}

impl StateMinimizingLanguageModel {
    pub fn new(index: usize, backend: Arc<dyn NgramBackend>) -> Self {
        Self {
            name: format!("lm_{index}"),
            backend,
            slot: 0,
            state_index: 0,
        }
    }

    fn pool(&self, scope: &SentenceScope) -> Result<PoolHandle, FeatureError> {
        scope
            .pool(self.state_index, &self.backend)
            .ok_or_else(|| FeatureError::NoPool {
                feature: self.name.clone(),
                index: self.state_index,
            })
    }

    fn native(&self, state: &DpState) -> Result<i64, FeatureError> {
        match state {
            DpState::Native(state) => Ok(state_ref(*state)),
            DpState::Ngram(_) => Err(FeatureError::WrongStateKind {
                feature: self.name.clone(),
                index: self.state_index,
            }),
        }
    }
}

impl FeatureFunction for StateMinimizingLanguageModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind_dense(&mut self, first_slot: usize) -> Vec<String> {
        self.slot = first_slot;
        vec![self.name.clone()]
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn bind_state(&mut self, index: usize) {
        self.state_index = index;
    }

    fn initial_state(
        &self,
        _sentence: &SourceSentence,
        scope: &SentenceScope,
    ) -> Result<Option<DpState>, FeatureError> {
        let pool = self.pool(scope)?;
        let start = self.backend.prob_rule(pool, &[START_ID as i64]);
        Ok(Some(DpState::Native(start.state)))
    }

    fn compute(&self, edge: &EdgeContext<'_>, acc: &mut dyn Accumulator) -> Result<Option<DpState>, FeatureError> {
        let mut words = Vec::with_capacity(edge.rule.target().len());
        for symbol in edge.rule.target() {
            match symbol {
                Symbol::Word(id) => words.push(*id as i64),
                Symbol::Gap { index, .. } => {
                    let state = edge.tail_state(&self.name, *index, self.state_index)?;
                    words.push(self.native(state)?);
                }
            }
        }
        let pool = self.pool(edge.scope)?;
        let result = self.backend.prob_rule(pool, &words);
        acc.add_dense(self.slot, result.prob);
        Ok(Some(DpState::Native(result.state)))
    }

    fn compute_final(
        &self,
        tail: &Hypothesis,
        _sentence: &SourceSentence,
        scope: &SentenceScope,
        acc: &mut dyn Accumulator,
    ) -> Result<Option<DpState>, FeatureError> {
        let state = tail
            .dp_state(self.state_index)
            .ok_or_else(|| FeatureError::MissingTailState {
                feature: self.name.clone(),
                tail: 0,
                index: self.state_index,
            })?;
        let words = [self.native(state)?, STOP_ID as i64];
        let pool = self.pool(scope)?;
        let result = self.backend.prob_rule(pool, &words);
        acc.add_dense(self.slot, result.prob);
        Ok(Some(DpState::Native(result.state)))
    }

    fn estimate_cost(&self, rule: &Rule, acc: &mut dyn Accumulator) {
        if rule.is_sentinel() {
            return;
        }
        let words: Vec<i64> = rule
            .target()
            .iter()
            .map(|s| match s {
                Symbol::Word(id) => *id as i64,
                Symbol::Gap { .. } => GAP_SENTINEL,
            })
            .collect();
        acc.add_dense(self.slot, self.backend.estimate_rule(&words));
    }
}
