use std::path::Path;
use std::sync::Arc;

use super::*;
use crate::coverage::Coverage;
use crate::hypothesis::{HyperEdge, Hypothesis};
use crate::lm::testutil::ToyBackend;
use crate::lm::BackendError;
use crate::settings::SearchAlgorithm;
use crate::weights::WeightTable;

fn toy_loader() -> impl LmLoader {
    |_: &Path| -> Result<Arc<dyn NgramBackend>, BackendError> { Ok(Arc::new(ToyBackend::new(3))) }
}

fn rule(vocab: &Vocabulary, line: &str, owner: &str) -> Rule {
    Rule::parse(line, owner, vocab).unwrap()
}

fn root(vocab: &Vocabulary, states: Vec<DpState>) -> Hypothesis {
    Hypothesis::root(Arc::new(Rule::begin(vocab, "X")), states, 4)
}

fn weights_for(set: &FeatureSet, pairs: &[(&str, f32)]) -> Weights {
    let mut table = WeightTable::default();
    for (name, value) in pairs {
        table.set(name, *value);
    }
    Weights::new(Arc::clone(set.dense_features()), &table)
}

#[test]
fn test_feature_args() {
    let args = FeatureArgs::parse("LanguageModel -lm_type kenlm -lm_order 5 -verbose -offset -3").unwrap();
    assert_eq!(args.name(), "LanguageModel");
    assert_eq!(args.get("lm_type"), Some("kenlm"));
    assert_eq!(args.parse_value::<usize>("lm_order").unwrap(), Some(5));
    assert_eq!(args.get("verbose"), Some("true"));
    assert_eq!(args.parse_value::<f32>("offset").unwrap(), Some(-3.0));
    assert!(args.require("lm_file").is_err());
    assert!(args.parse_value::<usize>("lm_type").is_err());

    assert!(FeatureArgs::parse("   ").is_err());
    assert!(FeatureArgs::parse("WordPenalty stray").is_err());
}

#[test]
fn test_factory_builds_known_features() {
    let config = DecoderConfig::default();
    let vocab = Arc::new(Vocabulary::new());
    let loader = toy_loader();
    let mut factory = FeatureFactory::new(&config, &vocab, &loader);
    for (line, name) in [
        ("Distortion", "Distortion"),
        ("WordPenalty", "WordPenalty"),
        ("PhrasePenalty -owner pt", "PhrasePenalty"),
        ("OOVPenalty", "OOVPenalty"),
        ("StateMinimizingLanguageModel -lm_type kenlm -lm_order 3 -lm_file a.lm", "lm_0"),
        ("LanguageModel -lm_file b.lm", "lm_1"),
    ] {
        assert_eq!(factory.build(line).unwrap().name(), name, "{line}");
    }
}

#[test]
fn test_factory_rejects_bad_lines() {
    let vocab = Arc::new(Vocabulary::new());
    let loader = toy_loader();

    let config = DecoderConfig::default();
    let mut factory = FeatureFactory::new(&config, &vocab, &loader);
    assert!(matches!(factory.build("Frobnicator"), Err(ConfigError::UnknownFeature(_))));
    assert!(matches!(
        factory.build("LanguageModel -lm_type berkeleylm -lm_file a.lm"),
        Err(ConfigError::InvalidValue { .. })
    ));
    assert!(matches!(factory.build("LanguageModel"), Err(ConfigError::InvalidValue { .. })));

    let config = DecoderConfig {
        search_algorithm: SearchAlgorithm::Cky,
        ..DecoderConfig::default()
    };
    let mut factory = FeatureFactory::new(&config, &vocab, &loader);
    assert!(matches!(
        factory.build("Distortion"),
        Err(ConfigError::FeatureSearchMismatch { .. })
    ));
}

#[test]
fn test_factory_surfaces_loader_failure() {
    let config = DecoderConfig::default();
    let vocab = Arc::new(Vocabulary::new());
    let loader = |p: &Path| -> Result<Arc<dyn NgramBackend>, BackendError> { Err(BackendError::ModelLoad(p.to_path_buf())) };
    let mut factory = FeatureFactory::new(&config, &vocab, &loader);
    assert!(matches!(
        factory.build("LanguageModel -lm_file missing.lm"),
        Err(ConfigError::Backend(BackendError::ModelLoad(_)))
    ));
}

#[test]
fn test_registration_fixes_slots_and_states() {
    let backend: Arc<dyn NgramBackend> = Arc::new(ToyBackend::new(2));
    let set = FeatureSet::register(vec![
        Box::new(PhraseModel::new("pt", 2)),
        Box::new(LanguageModel::new(0, Arc::clone(&backend))),
        Box::new(WordPenalty::new()),
        Box::new(StateMinimizingLanguageModel::new(1, backend)),
    ])
    .unwrap();
    assert_eq!(set.len(), 4);
    assert_eq!(set.num_stateful(), 2);
    assert_eq!(
        set.dense_features().names(),
        &["tm_pt_0", "tm_pt_1", "lm_0", "WordPenalty", "lm_1"]
    );
    assert_eq!(set.names().collect::<Vec<_>>(), vec!["tm_pt", "lm_0", "WordPenalty", "lm_1"]);
}

#[test]
fn test_duplicate_dense_name_rejected() {
    let result = FeatureSet::register(vec![Box::new(WordPenalty::new()), Box::new(WordPenalty::new())]);
    assert!(matches!(result, Err(ConfigError::DuplicateFeature(name)) if name == "WordPenalty"));
}

#[test]
fn test_penalties_and_phrase_model_on_an_edge() {
    let vocab = Vocabulary::new();
    let set = FeatureSet::register(vec![
        Box::new(PhraseModel::new("pt", 2)),
        Box::new(WordPenalty::new()),
        Box::new(PhrasePenalty::new(None)),
        Box::new(OovPenalty::new()),
        Box::new(Distortion::new(SearchAlgorithm::Stack).unwrap()),
    ])
    .unwrap();
    let weights = weights_for(&set, &[("tm_pt_0", 1.0), ("tm_pt_1", 2.0), ("WordPenalty", 1.0), ("Distortion", 0.5), ("lex", 3.0)]);

    let sentence = SourceSentence::intern(&crate::sentence::Sentence::new(0, "a b c"), &vocab);
    let scope = SentenceScope::new(0, 0);
    let tail = root(&vocab, vec![]);
    let tails = [&tail];
    let r = rule(&vocab, "[X] ||| [X,1] c ||| [X,1] the c ||| -1 -2 lex=0.5", "pt");
    let edge = EdgeContext {
        rule: &r,
        tails: &tails,
        span: (3, 4),
        sentence: &sentence,
        scope: &scope,
    };

    let fv = set.edge_features(&edge).unwrap();
    let names = set.dense_features();
    assert_eq!(fv.get("tm_pt_0", names), -1.0);
    assert_eq!(fv.get("tm_pt_1", names), -2.0);
    assert_eq!(fv.get("WordPenalty", names), 2.0 * WordPenalty::OMEGA);
    assert_eq!(fv.get("PhrasePenalty", names), 1.0);
    assert_eq!(fv.get("OOVPenalty", names), 0.0);
    assert_eq!(fv.get("Distortion", names), -2.0);
    assert_eq!(fv.sparse("lex"), Some(0.5));

    let scored = set.score_edge(&edge, &weights).unwrap();
    assert!(scored.states.is_empty());
    assert!((scored.score - fv.inner_product(&weights)).abs() < 1e-5);
}

#[test]
fn test_oov_and_owner_filters() {
    let vocab = Vocabulary::new();
    let set = FeatureSet::register(vec![
        Box::new(PhraseModel::new("pt", 1)),
        Box::new(PhrasePenalty::new(Some("pt".to_string()))),
        Box::new(OovPenalty::new()),
    ])
    .unwrap();
    let weights = weights_for(&set, &[("PhrasePenalty", 1.0), ("OOVPenalty", 1.0), ("tm_pt_0", 1.0)]);

    let oov = Rule::oov(&vocab, "X", vocab.id("zzz"));
    assert_eq!(set.estimate_rule(&oov, &weights), OovPenalty::DEFAULT);

    let other = rule(&vocab, "[X] ||| [X,1] a ||| [X,1] b ||| 5", "custom");
    // owned by another grammar: neither the phrase model nor the filtered
    // penalty fire
    assert_eq!(set.estimate_rule(&other, &weights), 0.0);

    let own = rule(&vocab, "[X] ||| [X,1] a ||| [X,1] b ||| 5", "pt");
    assert_eq!(set.estimate_rule(&own, &weights), 6.0);
}

#[test]
fn test_penalty_values_from_args() {
    let args = FeatureArgs::parse("OOVPenalty -value -10").unwrap();
    let mut ff = OovPenalty::from_args(&args).unwrap();
    let set_names = ff.bind_dense(0);
    assert_eq!(set_names, vec!["OOVPenalty"]);
    let vocab = Vocabulary::new();
    let set = FeatureSet::register(vec![Box::new(ff)]).unwrap();
    let weights = weights_for(&set, &[("OOVPenalty", 1.0)]);
    assert_eq!(set.estimate_rule(&Rule::oov(&vocab, "X", 7), &weights), -10.0);

    let args = FeatureArgs::parse("PhrasePenalty -value x").unwrap();
    assert!(PhrasePenalty::from_args(&args).is_err());
}

#[test]
fn test_sentinels_cost_nothing() {
    let vocab = Vocabulary::new();
    let set = FeatureSet::register(vec![
        Box::new(WordPenalty::new()),
        Box::new(PhrasePenalty::new(None)),
        Box::new(Distortion::new(SearchAlgorithm::Stack).unwrap()),
    ])
    .unwrap();
    let weights = weights_for(&set, &[("WordPenalty", 1.0), ("PhrasePenalty", 1.0), ("Distortion", 1.0)]);
    let sentence = SourceSentence::intern(&crate::sentence::Sentence::new(0, "a"), &vocab);
    let scope = SentenceScope::new(0, 0);
    let tail = root(&vocab, vec![]);
    let tails = [&tail];
    let end = Rule::end(&vocab, "X");
    let edge = EdgeContext {
        rule: &end,
        tails: &tails,
        span: (0, 3),
        sentence: &sentence,
        scope: &scope,
    };
    assert_eq!(set.score_edge(&edge, &weights).unwrap().score, 0.0);
}

#[test]
fn test_stateful_edge_requires_tail_state() {
    let vocab = Arc::new(Vocabulary::new());
    let backend: Arc<dyn NgramBackend> = Arc::new(ToyBackend::new(2));
    vocab.register_language_model(Arc::clone(&backend));
    let set = FeatureSet::register(vec![Box::new(StateMinimizingLanguageModel::new(0, backend))]).unwrap();
    let weights = weights_for(&set, &[("lm_0", 1.0)]);

    let sentence = SourceSentence::intern(&crate::sentence::Sentence::new(0, "a"), &vocab);
    let scope = SentenceScope::new(0, set.num_stateful());
    let r = rule(&vocab, "[X] ||| [X,1] a ||| [X,1] a", "pt");

    let stateless = root(&vocab, vec![]);
    let tails = [&stateless];
    let edge = EdgeContext {
        rule: &r,
        tails: &tails,
        span: (1, 2),
        sentence: &sentence,
        scope: &scope,
    };
    assert!(matches!(
        set.score_edge(&edge, &weights),
        Err(FeatureError::MissingTailState { .. })
    ));

    let states = set.initial_states(&sentence, &scope).unwrap();
    assert_eq!(states.len(), 1);
    let tail = root(&vocab, states);
    let tails = [&tail];
    let edge = EdgeContext {
        rule: &r,
        tails: &tails,
        span: (1, 2),
        sentence: &sentence,
        scope: &scope,
    };
    let scored = set.score_edge(&edge, &weights).unwrap();
    assert_eq!(scored.states.len(), 1);
    assert_eq!(scored.score, ToyBackend::UNSEEN);

    let next = Hypothesis::derive(
        Coverage::root(3).with(1, 2),
        Some(scored.states),
        HyperEdge {
            rule: Arc::new(r),
            tails: vec![0],
            span: (1, 2),
            transition_score: scored.score,
            best_score: scored.score,
        },
        0.0,
    )
    .unwrap();
    let fin = set.final_features(&next, &sentence, &scope).unwrap();
    assert_eq!(fin.get("lm_0", set.dense_features()), ToyBackend::UNSEEN);
}
