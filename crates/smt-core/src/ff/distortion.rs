use super::{Accumulator, DpState, EdgeContext, FeatureError, FeatureFunction};
use crate::settings::{ConfigError, SearchAlgorithm};

/// Penalises reordering by the distance jumped from the end of the previous
/// phrase to the start of the new one.
pub struct Distortion {
    slot: usize,
}

impl Distortion {
    pub fn new(search: SearchAlgorithm) -> Result<Self, ConfigError> {
        if search != SearchAlgorithm::Stack {
            return Err(ConfigError::FeatureSearchMismatch {
                feature: "Distortion".to_string(),
                search,
            });
        }
        Ok(Self { slot: 0 })
    }
}

impl FeatureFunction for Distortion {
    fn name(&self) -> &str {
        "Distortion"
    }

    fn bind_dense(&mut self, first_slot: usize) -> Vec<String> {
        self.slot = first_slot;
        vec!["Distortion".to_string()]
    }

    fn compute(&self, edge: &EdgeContext<'_>, acc: &mut dyn Accumulator) -> Result<Option<DpState>, FeatureError> {
        if edge.rule.is_sentinel() {
            return Ok(None);
        }
        if let Some(prev) = edge.tails.first() {
            let jump = prev.last_source_index().abs_diff(edge.span.0);
            acc.add_dense(self.slot, -(jump as f32));
        }
        Ok(None)
    }
}
