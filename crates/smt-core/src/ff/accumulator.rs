//! Sinks for feature contributions.
//!
//! The search only needs a weighted sum; output extraction needs the
//! unweighted breakdown. Features write to either through the same trait.

use std::sync::Arc;

use crate::weights::{DenseFeatures, FeatureVector, Weights};

pub trait Accumulator {
    fn add_dense(&mut self, slot: usize, value: f32);
    fn add_sparse(&mut self, name: &str, value: f32);
}

/// Running dot product with the live weights.
pub struct ScoreAccumulator<'w> {
    weights: &'w Weights,
    score: f32,
}

impl<'w> ScoreAccumulator<'w> {
    pub fn new(weights: &'w Weights) -> Self {
        Self { weights, score: 0.0 }
    }

    pub fn score(&self) -> f32 {
        self.score
    }
}

impl Accumulator for ScoreAccumulator<'_> {
    fn add_dense(&mut self, slot: usize, value: f32) {
        self.score += value * self.weights.dense(slot);
    }

    fn add_sparse(&mut self, name: &str, value: f32) {
        self.score += value * self.weights.get(name);
    }
}

/// Collects the unweighted feature vector.
pub struct FeatureAccumulator {
    names: Arc<DenseFeatures>,
    features: FeatureVector,
}

impl FeatureAccumulator {
    pub fn new(names: Arc<DenseFeatures>) -> Self {
        Self {
            names,
            features: FeatureVector::new(),
        }
    }

    pub fn into_features(self) -> FeatureVector {
        self.features
    }
}

impl Accumulator for FeatureAccumulator {
    fn add_dense(&mut self, slot: usize, value: f32) {
        self.features.add_dense(slot, value);
    }

    fn add_sparse(&mut self, name: &str, value: f32) {
        // A labelled rule feature may name a registered dense feature.
        match self.names.slot(name) {
            Some(slot) => self.features.add_dense(slot, value),
            None => self.features.add_sparse(name, value),
        }
    }
}
