mod directives;

use std::sync::Arc;

use smt_core::ff::{Accumulator, DpState, EdgeContext, FeatureError, FeatureFunction};
use smt_core::grammar::{Grammar, MemoryGrammar};
use smt_core::rule::Rule;
use smt_core::settings::DecoderConfig;
use smt_core::sentence::Sentence;

use crate::{Decoder, DecoderBuilder, Translation};

/// One single-word rule per lowercase token, translating to upper case.
pub(super) const GRAMMAR: &str = "\
[X] ||| [X,1] a ||| [X,1] A ||| -1
[X] ||| [X,1] b ||| [X,1] B ||| -1
[X] ||| [X,1] c ||| [X,1] C ||| -1
[X] ||| [X,1] d ||| [X,1] D ||| -1
[X] ||| [X,1] e ||| [X,1] E ||| -1
";

/// -1 for every rule applied, sentinels excluded.
pub(super) struct RuleCount {
    slot: usize,
}

impl RuleCount {
    pub fn new() -> Self {
        Self { slot: 0 }
    }

    fn score(&self, rule: &Rule, acc: &mut dyn Accumulator) {
        if !rule.is_sentinel() {
            acc.add_dense(self.slot, -1.0);
        }
    }
}

impl FeatureFunction for RuleCount {
    fn name(&self) -> &str {
        "RuleCount"
    }

    fn bind_dense(&mut self, first_slot: usize) -> Vec<String> {
        self.slot = first_slot;
        vec!["RuleCount".to_string()]
    }

    fn compute(&self, edge: &EdgeContext<'_>, acc: &mut dyn Accumulator) -> Result<Option<DpState>, FeatureError> {
        self.score(edge.rule, acc);
        Ok(None)
    }

    fn estimate_cost(&self, rule: &Rule, acc: &mut dyn Accumulator) {
        self.score(rule, acc);
    }
}

pub(super) fn test_config(threads: usize) -> DecoderConfig {
    DecoderConfig {
        num_parallel_decoders: threads,
        features: vec!["Distortion".to_string()],
        weights: vec![
            "tm_pt_0 0".to_string(),
            "Distortion 1".to_string(),
            "RuleCount 1".to_string(),
        ],
        ..DecoderConfig::default()
    }
}

/// Builder with the toy grammar and `RuleCount` already attached.
pub(super) fn test_builder(config: DecoderConfig) -> DecoderBuilder {
    let builder = DecoderBuilder::new(config);
    let grammar = MemoryGrammar::from_reader("pt", GRAMMAR.as_bytes(), "test", builder.vocabulary()).unwrap();
    builder
        .with_grammar(Arc::new(grammar) as Arc<dyn Grammar>)
        .with_feature(Box::new(RuleCount::new()))
}

pub(super) fn test_decoder(threads: usize) -> Decoder {
    test_builder(test_config(threads)).build().unwrap()
}

pub(super) fn sentences(lines: &[&str]) -> Vec<Sentence> {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| Sentence::parse(i as u32, line))
        .collect()
}

pub(super) fn translate_all(decoder: &Decoder, lines: &[&str]) -> Vec<Translation> {
    decoder.submit(sentences(lines)).unwrap().collect()
}
