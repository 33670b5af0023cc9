use super::{test_builder, test_config, test_decoder, translate_all};

#[test]
fn test_set_weights_applies_from_its_sentence_on() {
    let decoder = test_decoder(1);
    let out = translate_all(&decoder, &["a", "@set_weights RuleCount 2.5 ||| a", "a"]);
    let scores: Vec<f32> = out.iter().map(|t| t.score()).collect();
    assert_eq!(scores, vec![-1.0, -2.5, -2.5]);
    assert_eq!(decoder.weights().get("RuleCount"), 2.5);

    let later = translate_all(&decoder, &["a b"]);
    assert_eq!(later[0].score(), -5.0);
}

#[test]
fn test_set_weights_reads_moses_names() {
    let mut config = test_config(1);
    config.moses_naming = true;
    let decoder = test_builder(config).build().unwrap();
    let out = translate_all(&decoder, &["@set_weights tm-pt-0 1 Distortion 2 ||| a"]);
    assert_eq!(out[0].score(), -2.0);
    assert_eq!(decoder.weights().get("tm_pt_0"), 1.0);
    assert_eq!(decoder.weights().get("Distortion"), 2.0);
}

#[test]
fn test_malformed_directives_are_ignored() {
    let decoder = test_decoder(1);
    let out = translate_all(
        &decoder,
        &[
            "@set_weights RuleCount ||| a",
            "@add_rule zz ||| a",
            "@remove_rule zz ,,, ||| a",
            "@frobnicate ||| a",
        ],
    );
    assert!(out.iter().all(|t| t.target() == "A" && t.score() == -1.0));
    assert!(out.iter().all(|t| t.directive_output().is_none()));
    assert!(decoder.custom_grammar().is_empty());
    assert_eq!(decoder.weights().get("RuleCount"), 1.0);
}

#[test]
fn test_add_list_remove_rule() {
    let decoder = test_decoder(1);
    let out = translate_all(
        &decoder,
        &[
            "@add_rule zz ,,, yy ||| a zz",
            "@list_rules",
            "@remove_rule zz ,,, yy ||| zz",
            "@list_rules",
        ],
    );
    assert_eq!(out[0].target(), "A yy");
    assert_eq!(out[0].score(), -2.0);

    let rules = out[1].directive_output().unwrap()["rules"].as_array().unwrap();
    assert_eq!(rules.len(), 1);
    let rule = rules[0].as_str().unwrap();
    assert!(rule.contains("zz") && rule.contains("yy") && rule.contains("custom=1"));
    assert_eq!(out[1].target(), "");

    assert_eq!(out[2].target(), "zz");
    let rules = out[3].directive_output().unwrap()["rules"].as_array().unwrap();
    assert!(rules.is_empty());
    assert!(decoder.custom_grammar().is_empty());
}

#[test]
fn test_custom_phrase_beats_word_by_word() {
    let decoder = test_decoder(1);
    let out = translate_all(&decoder, &["@add_rule a b ,,, the ab ||| a b c"]);
    assert_eq!(out[0].target(), "the ab C");
    assert_eq!(out[0].score(), -2.0);
    assert_eq!(decoder.custom_grammar().len(), 1);
}

#[test]
fn test_remove_needs_matching_target() {
    let decoder = test_decoder(1);
    translate_all(&decoder, &["@add_rule zz ,,, yy", "@remove_rule zz ,,, ww"]);
    assert_eq!(decoder.custom_grammar().len(), 1);
}
