use std::sync::Arc;

use super::NgramBackend;
use crate::ff::{Accumulator, DpState, EdgeContext, FeatureError, FeatureFunction, NgramState};
use crate::hypothesis::Hypothesis;
use crate::lm::SentenceScope;
use crate::rule::{Rule, Symbol};
use crate::sentence::SourceSentence;
use crate::vocab::{WordId, START_ID, STOP_ID};

/// Language model whose DP state is the last `order - 1` target words.
///
/// Target sides are scored left to right, one [`NgramBackend::sequence_prob`]
/// call per run of terminals. A gap resets the history to the right context
/// of the tail filling it. That is exact for left-to-right (stack) decoding.
pub struct LanguageModel {
    name: String,
    backend: Arc<dyn NgramBackend>,
    slot: usize,
    state_index: usize,
}

impl LanguageModel {
    pub fn new(index: usize, backend: Arc<dyn NgramBackend>) -> Self {
        Self {
            name: format!("lm_{index}"),
            backend,
            slot: 0,
            state_index: 0,
        }
    }

    fn history(&self) -> usize {
        self.backend.order().saturating_sub(1)
    }

    /// Score the terminals appended to `run` after its first `scored_from`
    /// words, then cut `run` back to the bounded history.
    fn flush(&self, run: &mut Vec<WordId>, scored_from: &mut usize) -> f32 {
        let prob = if *scored_from < run.len() {
            self.backend.sequence_prob(run, *scored_from)
        } else {
            0.0
        };
        let keep = self.history();
        if run.len() > keep {
            run.drain(..run.len() - keep);
        }
        *scored_from = run.len();
        prob
    }

    /// Score a target side after `context`, taking each gap's history from
    /// `gap`. Returns the log10 probability and the final history.
    fn score_target<F>(
        &self,
        target: &[Symbol],
        context: Vec<WordId>,
        mut gap: F,
    ) -> Result<(f32, Vec<WordId>), FeatureError>
    where
        F: FnMut(usize) -> Result<Vec<WordId>, FeatureError>,
    {
        let mut run = context;
        let mut scored_from = run.len();
        let mut total = 0.0;
        for symbol in target {
            match symbol {
                Symbol::Word(id) => run.push(*id),
                Symbol::Gap { index, .. } => {
                    total += self.flush(&mut run, &mut scored_from);
                    run = gap(*index)?;
                    scored_from = run.len();
                }
            }
        }
        total += self.flush(&mut run, &mut scored_from);
        Ok((total, run))
    }

    fn context_of(&self, state: &DpState) -> Result<Vec<WordId>, FeatureError> {
        match state {
            DpState::Ngram(s) => Ok(s.context.clone()),
            DpState::Native(_) => Err(FeatureError::WrongStateKind {
                feature: self.name.clone(),
                index: self.state_index,
            }),
        }
    }
}

impl FeatureFunction for LanguageModel {
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
        _scope: &SentenceScope,
    ) -> Result<Option<DpState>, FeatureError> {
        Ok(Some(DpState::Ngram(NgramState {
            context: vec![START_ID],
        })))
    }

    fn compute(&self, edge: &EdgeContext<'_>, acc: &mut dyn Accumulator) -> Result<Option<DpState>, FeatureError> {
        let (total, context) = self.score_target(edge.rule.target(), Vec::new(), |index| {
            self.context_of(edge.tail_state(&self.name, index, self.state_index)?)
        })?;
        acc.add_dense(self.slot, total);
        Ok(Some(DpState::Ngram(NgramState { context })))
    }

    fn compute_final(
        &self,
        tail: &Hypothesis,
        _sentence: &SourceSentence,
        _scope: &SentenceScope,
        acc: &mut dyn Accumulator,
    ) -> Result<Option<DpState>, FeatureError> {
        let state = tail
            .dp_state(self.state_index)
            .ok_or_else(|| FeatureError::MissingTailState {
                feature: self.name.clone(),
                tail: 0,
                index: self.state_index,
            })?;
        let context = self.context_of(state)?;
        let (total, context) = self.score_target(&[Symbol::Word(STOP_ID)], context, |_| Ok(Vec::new()))?;
        acc.add_dense(self.slot, total);
        Ok(Some(DpState::Ngram(NgramState { context })))
    }

    fn estimate_cost(&self, rule: &Rule, acc: &mut dyn Accumulator) {
        if rule.is_sentinel() {
            return;
        }
        // gaps carry no history here, so scoring cannot fail
        if let Ok((total, _)) = self.score_target(rule.target(), Vec::new(), |_| Ok(Vec::new())) {
            acc.add_dense(self.slot, total);
        }
    }
}
