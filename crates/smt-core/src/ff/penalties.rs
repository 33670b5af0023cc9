//! Simple counting features.

use std::f32::consts::LOG10_E;

use super::{Accumulator, DpState, EdgeContext, FeatureArgs, FeatureError, FeatureFunction};
use crate::rule::{Rule, OOV_OWNER};
use crate::settings::ConfigError;

/// `-log10(e)` per target word, i.e. one natural-log unit in log10 space.
pub struct WordPenalty {
    slot: usize,
}

impl WordPenalty {
    pub const OMEGA: f32 = -LOG10_E;

    pub fn new() -> Self {
        Self { slot: 0 }
    }

    fn score(&self, rule: &Rule, acc: &mut dyn Accumulator) {
        if !rule.is_sentinel() {
            let words = rule.target_terminals().count();
            acc.add_dense(self.slot, Self::OMEGA * words as f32);
        }
    }
}

impl Default for WordPenalty {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureFunction for WordPenalty {
    fn name(&self) -> &str {
        "WordPenalty"
    }

    fn bind_dense(&mut self, first_slot: usize) -> Vec<String> {
        self.slot = first_slot;
        vec!["WordPenalty".to_string()]
    }

    fn compute(&self, edge: &EdgeContext<'_>, acc: &mut dyn Accumulator) -> Result<Option<DpState>, FeatureError> {
        self.score(edge.rule, acc);
        Ok(None)
    }

    fn estimate_cost(&self, rule: &Rule, acc: &mut dyn Accumulator) {
        self.score(rule, acc);
    }
}

/// A constant per applied rule, optionally restricted to one grammar.
pub struct PhrasePenalty {
    slot: usize,
    owner: Option<String>,
    value: f32,
}

impl PhrasePenalty {
    pub fn new(owner: Option<String>) -> Self {
        Self {
            slot: 0,
            owner,
            value: 1.0,
        }
    }

    pub fn from_args(args: &FeatureArgs) -> Result<Self, ConfigError> {
        let mut ff = Self::new(args.get("owner").map(str::to_string));
        if let Some(value) = args.parse_value("value")? {
            ff.value = value;
        }
        Ok(ff)
    }

    fn score(&self, rule: &Rule, acc: &mut dyn Accumulator) {
        if rule.is_sentinel() {
            return;
        }
        if self.owner.as_deref().map_or(true, |o| o == rule.owner()) {
            acc.add_dense(self.slot, self.value);
        }
    }
}

impl FeatureFunction for PhrasePenalty {
    fn name(&self) -> &str {
        "PhrasePenalty"
    }

    fn bind_dense(&mut self, first_slot: usize) -> Vec<String> {
        self.slot = first_slot;
        vec!["PhrasePenalty".to_string()]
    }

    fn compute(&self, edge: &EdgeContext<'_>, acc: &mut dyn Accumulator) -> Result<Option<DpState>, FeatureError> {
        self.score(edge.rule, acc);
        Ok(None)
    }

    fn estimate_cost(&self, rule: &Rule, acc: &mut dyn Accumulator) {
        self.score(rule, acc);
    }
}

/// Fixed penalty for every pass-through rule made up for an unknown word.
pub struct OovPenalty {
    slot: usize,
    value: f32,
}

impl OovPenalty {
    pub const DEFAULT: f32 = -100.0;

    pub fn new() -> Self {
        Self {
            slot: 0,
            value: Self::DEFAULT,
        }
    }

    pub fn from_args(args: &FeatureArgs) -> Result<Self, ConfigError> {
        let mut ff = Self::new();
        if let Some(value) = args.parse_value("value")? {
            ff.value = value;
        }
        Ok(ff)
    }

    fn score(&self, rule: &Rule, acc: &mut dyn Accumulator) {
        if rule.owner() == OOV_OWNER {
            acc.add_dense(self.slot, self.value);
        }
    }
}

impl Default for OovPenalty {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureFunction for OovPenalty {
    fn name(&self) -> &str {
        "OOVPenalty"
    }

    fn bind_dense(&mut self, first_slot: usize) -> Vec<String> {
        self.slot = first_slot;
        vec!["OOVPenalty".to_string()]
    }

    fn compute(&self, edge: &EdgeContext<'_>, acc: &mut dyn Accumulator) -> Result<Option<DpState>, FeatureError> {
        self.score(edge.rule, acc);
        Ok(None)
    }

    fn estimate_cost(&self, rule: &Rule, acc: &mut dyn Accumulator) {
        self.score(rule, acc);
    }
}
