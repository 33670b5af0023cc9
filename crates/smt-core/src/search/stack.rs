//! Phrase-based stack decoding.
//!
//! Stack `k` holds hypotheses covering `k` source positions (counting `<s>`).
//! Stacks are expanded in order; each keeps at most `pop_limit` hypotheses
//! ranked by score plus future cost. Equivalent hypotheses are recombined
//! as they are pushed.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use super::{extract, Derivation, FutureCosts, SearchError, SearchStrategy};
use crate::ff::EdgeContext;
use crate::hypothesis::{by_descending_score, HyperEdge, Hypothesis, NodeId, Signature};
use crate::lm::SentenceScope;
use crate::model::Model;
use crate::rule::{Rule, Symbol};
use crate::sentence::SourceSentence;

/// Built-in strategy for `search_algorithm = "stack"`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StackSearch;

impl StackSearch {
    pub fn new() -> Self {
        Self
    }
}

/// Candidate rules per source span `[i, j)`, best estimates first.
struct TranslationOptions {
    spans: HashMap<(usize, usize), Vec<Arc<Rule>>>,
}

impl TranslationOptions {
    fn collect(model: &Model, sentence: &SourceSentence) -> Self {
        let words = sentence.words();
        let end = words.len() - 1;
        let config = &model.config;
        let gap = Symbol::Gap {
            label: model.nonterminal(),
            index: 0,
        };
        let mut spans = HashMap::new();
        for i in 1..end {
            for j in i + 1..=end.min(i + config.max_phrase_length) {
                let mut key = Vec::with_capacity(j - i + 1);
                key.push(gap);
                key.extend(words[i..j].iter().map(|&w| Symbol::Word(w)));
                let mut rules: Vec<Arc<Rule>> = model.grammars.iter().flat_map(|g| g.rules_for(&key)).collect();
                if rules.is_empty() && j == i + 1 {
                    rules.push(Arc::new(Rule::oov(
                        &model.vocab,
                        &config.default_non_terminal,
                        words[i],
                    )));
                }
                if rules.is_empty() {
                    continue;
                }
                rules.sort_by(|a, b| {
                    let a = a.estimate_cost(&model.features, &model.weights);
                    let b = b.estimate_cost(&model.features, &model.weights);
                    b.total_cmp(&a)
                });
                rules.truncate(config.num_translation_options);
                spans.insert((i, j), rules);
            }
        }
        Self { spans }
    }

    fn get(&self, i: usize, j: usize) -> &[Arc<Rule>] {
        self.spans.get(&(i, j)).map(Vec::as_slice).unwrap_or_default()
    }

    fn future_costs(&self, len: usize, model: &Model) -> FutureCosts {
        let mut costs = FutureCosts::new(len);
        for (&(i, j), rules) in &self.spans {
            if let Some(best) = rules.first() {
                costs.set(i, j, best.estimate_cost(&model.features, &model.weights));
            }
        }
        costs.complete()
    }
}

/// One beam of hypotheses with recombination.
#[derive(Default)]
struct Stack {
    members: Vec<NodeId>,
    index: HashMap<Signature, NodeId>,
}

impl Stack {
    fn push(&mut self, nodes: &mut Vec<Hypothesis>, hyp: Hypothesis) {
        let signature = hyp.signature();
        match self.index.get(&signature) {
            Some(&id) => nodes[id].absorb(hyp),
            None => {
                let id = nodes.len();
                nodes.push(hyp);
                self.index.insert(signature, id);
                self.members.push(id);
            }
        }
    }

    /// The best `limit` members by beam score.
    fn beam(&self, nodes: &[Hypothesis], limit: usize) -> Vec<NodeId> {
        let mut ids = self.members.clone();
        ids.sort_by(|&a, &b| nodes[b].beam_score().total_cmp(&nodes[a].beam_score()));
        ids.truncate(limit);
        ids
    }
}

impl SearchStrategy for StackSearch {
    fn search(
        &self,
        model: &Model,
        sentence: &SourceSentence,
        scope: &SentenceScope,
    ) -> Result<Vec<Derivation>, SearchError> {
        let config = &model.config;
        // coverage spans <s> and the words; </s> is added by the goal edge
        let len = sentence.words().len() - 1;
        let options = TranslationOptions::collect(model, sentence);
        let future = options.future_costs(len, model);

        let states = model.features.initial_states(sentence, scope)?;
        let mut nodes = vec![Hypothesis::root(Arc::clone(model.begin_rule()), states, len)];
        let mut stacks: Vec<Stack> = (0..=len).map(|_| Stack::default()).collect();
        stacks[1].members.push(0);

        for covered in 1..len {
            let beam = stacks[covered].beam(&nodes, config.pop_limit);
            debug!(covered, size = stacks[covered].members.len(), kept = beam.len(), "expanding stack");
            for id in beam {
                for hyp in expand(model, sentence, scope, &options, &future, &nodes, id)? {
                    let target = hyp.coverage().count();
                    stacks[target].push(&mut nodes, hyp);
                }
            }
        }

        let mut goals = Vec::new();
        for id in stacks[len].beam(&nodes, config.pop_limit) {
            let tail = &nodes[id];
            let closing = model.features.score_final(tail, sentence, scope, &model.weights)?;
            let edge = HyperEdge {
                rule: Arc::clone(model.end_rule()),
                tails: vec![id],
                span: (len, len + 1),
                transition_score: closing.score,
                best_score: tail.score() + closing.score,
            };
            let goal = Hypothesis::derive(tail.coverage().clone(), Some(closing.states), edge, 0.0)
                .ok_or(SearchError::MissingState)?;
            goals.push(nodes.len());
            nodes.push(goal);
        }
        if goals.is_empty() {
            return Err(SearchError::NoDerivation(sentence.id()));
        }
        goals.sort_by(|&a, &b| by_descending_score(&nodes[a], &nodes[b]));
        goals.truncate(config.top_n);
        debug!(nodes = nodes.len(), goals = goals.len(), best = nodes[goals[0]].score(), "stack search done");

        goals
            .into_iter()
            .map(|goal| extract(&nodes, goal, model, sentence, scope))
            .collect()
    }
}

/// Every legal one-phrase extension of node `id`.
fn expand(
    model: &Model,
    sentence: &SourceSentence,
    scope: &SentenceScope,
    options: &TranslationOptions,
    future: &FutureCosts,
    nodes: &[Hypothesis],
    id: NodeId,
) -> Result<Vec<Hypothesis>, SearchError> {
    let config = &model.config;
    let limit = config.reordering_limit;
    let hyp = &nodes[id];
    let coverage = hyp.coverage();
    let len = coverage.len();
    let mut out = Vec::new();

    for i in coverage.first_zero()..len {
        if coverage.is_covered(i) || hyp.last_source_index().abs_diff(i) > limit {
            continue;
        }
        for j in i + 1..=len.min(i + config.max_phrase_length) {
            if coverage.is_covered(j - 1) {
                break;
            }
            let next = coverage.with(i, j);
            // the leftmost gap must stay reachable from where this phrase ends
            if !next.is_complete() && j.abs_diff(next.first_zero()) > limit {
                continue;
            }
            for rule in options.get(i, j) {
                let tails = [hyp];
                let context = EdgeContext {
                    rule,
                    tails: &tails,
                    span: (i, j),
                    sentence,
                    scope,
                };
                let scored = model.features.score_edge(&context, &model.weights)?;
                let score = hyp.score() + scored.score;
                let future_cost =
                    future.estimate(&next) + model.features.estimate_future(rule, Some(&scored.states), &model.weights);
                let edge = HyperEdge {
                    rule: Arc::clone(rule),
                    tails: vec![id],
                    span: (i, j),
                    transition_score: scored.score,
                    best_score: score,
                };
                trace!(from = id, i, j, score, future_cost, "candidate");
                let derived = Hypothesis::derive(next.clone(), Some(scored.states), edge, future_cost)
                    .ok_or(SearchError::MissingState)?;
                out.push(derived);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ff::{Distortion, FeatureFunction, FeatureSet, OovPenalty, PhraseModel, WordPenalty};
    use crate::grammar::{Grammar, MemoryGrammar};
    use crate::lm::testutil::ToyBackend;
    use crate::lm::{LanguageModel, NgramBackend, StateMinimizingLanguageModel};
    use crate::search::decode_sentence;
    use crate::sentence::Sentence;
    use crate::settings::{DecoderConfig, SearchAlgorithm};
    use crate::vocab::Vocabulary;
    use crate::weights::{WeightTable, Weights};

    const GRAMMAR: &str = "\
[X] ||| [X,1] das ||| [X,1] the ||| -0.1
[X] ||| [X,1] das ||| [X,1] that ||| -1.0
[X] ||| [X,1] haus ||| [X,1] house ||| -0.2
[X] ||| [X,1] a ||| [X,1] A ||| -1
[X] ||| [X,1] b ||| [X,1] B ||| -1
";

    struct Fixture {
        model: Model,
        backend: Option<Arc<ToyBackend>>,
    }

    fn fixture(config: DecoderConfig, lm: Option<ToyBackend>, weights: &[(&str, f32)]) -> Fixture {
        build(config, lm, weights, false)
    }

    /// Like [`fixture`], but the language model keeps explicit word histories.
    fn history_fixture(config: DecoderConfig, lm: ToyBackend, weights: &[(&str, f32)]) -> Fixture {
        build(config, Some(lm), weights, true)
    }

    fn build(config: DecoderConfig, lm: Option<ToyBackend>, weights: &[(&str, f32)], histories: bool) -> Fixture {
        let vocab = Arc::new(Vocabulary::new());
        let grammar = Arc::new(MemoryGrammar::from_reader("pt", GRAMMAR.as_bytes(), "test", &vocab).unwrap());
        let mut features: Vec<Box<dyn FeatureFunction>> = vec![
            Box::new(PhraseModel::new("pt", grammar.num_dense_features())),
            Box::new(Distortion::new(SearchAlgorithm::Stack).unwrap()),
            Box::new(WordPenalty::new()),
            Box::new(OovPenalty::new()),
        ];
        let backend = lm.map(Arc::new);
        if let Some(backend) = &backend {
            let dyn_backend: Arc<dyn NgramBackend> = backend.clone();
            vocab.register_language_model(Arc::clone(&dyn_backend));
            if histories {
                features.push(Box::new(LanguageModel::new(0, dyn_backend)));
            } else {
                features.push(Box::new(StateMinimizingLanguageModel::new(0, dyn_backend)));
            }
        }
        let features = Arc::new(FeatureSet::register(features).unwrap());
        let mut table = WeightTable::default();
        for (name, value) in weights {
            table.set(name, *value);
        }
        let weights = Arc::new(Weights::new(Arc::clone(features.dense_features()), &table));
        let grammars: Vec<Arc<dyn Grammar>> = vec![grammar as Arc<dyn Grammar>];
        let model = Model::new(Arc::new(config), vocab, weights, features, grammars);
        model.estimate_grammars();
        Fixture { model, backend }
    }

    fn decode(f: &Fixture, id: u32, text: &str) -> Vec<Derivation> {
        decode_sentence(&f.model, &StackSearch::new(), &Sentence::new(id, text)).unwrap()
    }

    #[test]
    fn test_monotone_translation() {
        let f = fixture(DecoderConfig::default(), None, &[("tm_pt_0", 1.0), ("Distortion", 1.0)]);
        let best = &decode(&f, 0, "das haus")[0];
        assert_eq!(best.target, "the house");
        assert!((best.score - -0.3).abs() < 1e-5);
        let names = f.model.features.dense_features();
        assert!((best.features.get("tm_pt_0", names) - -0.3).abs() < 1e-5);
        assert_eq!(best.features.get("Distortion", names), 0.0);
        assert!((best.features.get("WordPenalty", names) - 2.0 * WordPenalty::OMEGA).abs() < 1e-5);
    }

    #[test]
    fn test_top_n_in_score_order() {
        let config = DecoderConfig {
            top_n: 5,
            ..DecoderConfig::default()
        };
        // a trigram state keeps "the house" and "that house" apart
        let weights = [("tm_pt_0", 1.0), ("lm_0", 1.0), ("Distortion", 1.0)];
        let f = fixture(config, Some(ToyBackend::new(3)), &weights);
        let all = decode(&f, 0, "das haus");
        let targets: Vec<&str> = all.iter().map(|d| d.target.as_str()).collect();
        assert_eq!(targets, vec!["the house", "that house", "house the", "house that"]);
        assert!(all.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_unknown_word_passes_through() {
        let weights = [("tm_pt_0", 1.0), ("OOVPenalty", 1.0), ("Distortion", 1.0)];
        let f = fixture(DecoderConfig::default(), None, &weights);
        let best = &decode(&f, 0, "das xyzzy")[0];
        assert_eq!(best.target, "the xyzzy");
        let names = f.model.features.dense_features();
        assert_eq!(best.features.get("OOVPenalty", names), OovPenalty::DEFAULT);
        assert!((best.score - (OovPenalty::DEFAULT - 0.1)).abs() < 1e-3);
    }

    #[test]
    fn test_empty_sentence() {
        let f = fixture(DecoderConfig::default(), Some(ToyBackend::new(2)), &[("lm_0", 1.0)]);
        let best = &decode(&f, 0, "")[0];
        assert_eq!(best.target, "");
    }

    fn reordering_lm() -> ToyBackend {
        ToyBackend::with_ngrams(2, &[("<s> B", 0.0), ("B A", 0.0), ("A </s>", 0.0)])
    }

    #[test]
    fn test_language_model_drives_reordering() {
        let weights = [("tm_pt_0", 1.0), ("lm_0", 1.0), ("Distortion", 0.1)];
        let f = fixture(DecoderConfig::default(), Some(reordering_lm()), &weights);
        let best = &decode(&f, 0, "a b")[0];
        assert_eq!(best.target, "B A");
        let names = f.model.features.dense_features();
        assert_eq!(best.features.get("Distortion", names), -3.0);
        assert_eq!(best.features.get("lm_0", names), 0.0);
    }

    #[test]
    fn test_history_language_model_scores_whole_runs() {
        let weights = [("tm_pt_0", 1.0), ("lm_0", 1.0), ("Distortion", 0.1)];
        let f = history_fixture(DecoderConfig::default(), reordering_lm(), &weights);
        let best = &decode(&f, 0, "a b")[0];
        assert_eq!(best.target, "B A");
        assert_eq!(best.features.get("lm_0", f.model.features.dense_features()), 0.0);
        let toy = f.backend.as_ref().unwrap();
        assert!(toy.sequence_calls() > 0);
        // explicit histories never touch native pools
        assert_eq!(toy.created_pools(), 0);
    }

    #[test]
    fn test_zero_reordering_limit_is_monotone() {
        let config = DecoderConfig {
            reordering_limit: 0,
            ..DecoderConfig::default()
        };
        let weights = [("tm_pt_0", 1.0), ("lm_0", 1.0), ("Distortion", 0.1)];
        let f = fixture(config, Some(reordering_lm()), &weights);
        let best = &decode(&f, 0, "a b")[0];
        assert_eq!(best.target, "A B");
        assert_eq!(best.features.get("Distortion", f.model.features.dense_features()), 0.0);
    }

    #[test]
    fn test_pools_released_per_sentence() {
        let f = fixture(DecoderConfig::default(), Some(reordering_lm()), &[("lm_0", 1.0)]);
        let backend = f.backend.as_ref().unwrap();
        let first = decode(&f, 0, "a b");
        assert_eq!(backend.live_pools(), 0);
        assert_eq!(backend.created_pools(), 1);
        let second = decode(&f, 1, "a b");
        assert_eq!(backend.live_pools(), 0);
        assert_eq!(backend.created_pools(), 2);
        assert_eq!(first[0].target, second[0].target);
        assert_eq!(first[0].score, second[0].score);
    }

    #[test]
    fn test_no_stateful_features_no_pools() {
        let f = fixture(DecoderConfig::default(), None, &[]);
        let source = SourceSentence::intern(&Sentence::new(0, "das"), &f.model.vocab);
        let scope = SentenceScope::new(0, f.model.features.num_stateful());
        StackSearch::new().search(&f.model, &source, &scope).unwrap();
        assert_eq!(scope.live_pools(), 0);
    }

    #[test]
    fn test_recombination_merges_equivalent_paths() {
        let vocab = Vocabulary::new();
        let rule = Arc::new(Rule::parse("[X] ||| [X,1] a ||| [X,1] A", "pt", &vocab).unwrap());
        let cov = crate::coverage::Coverage::root(3).with(1, 2);
        let make = |score: f32| {
            Hypothesis::derive(
                cov.clone(),
                Some(vec![]),
                HyperEdge {
                    rule: Arc::clone(&rule),
                    tails: vec![0],
                    span: (1, 2),
                    transition_score: score,
                    best_score: score,
                },
                0.0,
            )
            .unwrap()
        };
        let mut nodes = Vec::new();
        let mut stack = Stack::default();
        stack.push(&mut nodes, make(-2.0));
        stack.push(&mut nodes, make(-1.0));
        assert_eq!(stack.members.len(), 1);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].score(), -1.0);
        assert_eq!(nodes[0].edges().len(), 2);
    }
}
