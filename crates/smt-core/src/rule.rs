//! Synchronous grammar rules.
//!
//! A rule pairs a source side with a target side; nonterminal gaps on the two
//! sides are linked by index. Rules are immutable once built, apart from the
//! context-free cost estimate which is attached exactly once.

use std::sync::OnceLock;

use thiserror::Error;

use crate::ff::FeatureSet;
use crate::vocab::{Vocabulary, WordId, START_ID, STOP_ID};
use crate::weights::Weights;

/// Owner tag of the pass-through rules made up for unknown source words.
pub const OOV_OWNER: &str = "oov";
/// Owner tag of the runtime-editable grammar.
pub const CUSTOM_OWNER: &str = "custom";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    Word(WordId),
    /// Nonterminal gap; `index` links a source gap to its target gap and to
    /// the tail node that fills it.
    Gap { label: WordId, index: usize },
}

impl Symbol {
    pub fn is_gap(&self) -> bool {
        matches!(self, Symbol::Gap { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Regular,
    /// Consumes `<s>`; the root hypothesis hangs off it.
    Begin,
    /// Appends `</s>` to a complete derivation.
    End,
}

#[derive(Debug, Error, PartialEq)]
pub enum RuleParseError {
    #[error("expected `[LHS] ||| source ||| target [||| features]`, got {0} field(s)")]
    FieldCount(usize),
    #[error("left-hand side must be a bracketed nonterminal, got {0:?}")]
    BadLhs(String),
    #[error("malformed nonterminal {0:?}")]
    BadGap(String),
    #[error("target gaps do not match source gaps")]
    GapMismatch,
    #[error("malformed feature value {0:?}")]
    BadFeature(String),
    #[error("empty source side")]
    EmptySource,
}

#[derive(Debug)]
pub struct Rule {
    lhs: WordId,
    source: Vec<Symbol>,
    target: Vec<Symbol>,
    features: Vec<(String, f32)>,
    owner: String,
    arity: usize,
    kind: RuleKind,
    estimate: OnceLock<f32>,
}

impl Rule {
    pub fn new(
        lhs: WordId,
        source: Vec<Symbol>,
        target: Vec<Symbol>,
        features: Vec<(String, f32)>,
        owner: &str,
    ) -> Self {
        let arity = source.iter().filter(|s| s.is_gap()).count();
        Self {
            lhs,
            source,
            target,
            features,
            owner: owner.to_string(),
            arity,
            kind: RuleKind::Regular,
            estimate: OnceLock::new(),
        }
    }

    /// Parse one line of a Hiero-format grammar:
    /// `[X] ||| [X,1] das haus ||| [X,1] the house ||| 0.5 custom=1`.
    ///
    /// Unlabelled scores are named `tm_<owner>_<i>`.
    pub fn parse(line: &str, owner: &str, vocab: &Vocabulary) -> Result<Self, RuleParseError> {
        let fields: Vec<&str> = line.split("|||").map(str::trim).collect();
        if fields.len() < 3 {
            return Err(RuleParseError::FieldCount(fields.len()));
        }
        let lhs = fields[0];
        if !(lhs.starts_with('[') && lhs.ends_with(']')) || lhs.contains(',') || lhs.len() < 3 {
            return Err(RuleParseError::BadLhs(lhs.to_string()));
        }
        let lhs = vocab.id(lhs);
        let source = parse_side(fields[1], vocab)?;
        if source.is_empty() {
            return Err(RuleParseError::EmptySource);
        }
        let target = parse_side(fields[2], vocab)?;
        if gap_indices(&source) != gap_indices(&target) {
            return Err(RuleParseError::GapMismatch);
        }
        let features = match fields.get(3) {
            Some(text) => parse_features(text, owner)?,
            None => Vec::new(),
        };
        Ok(Self::new(lhs, source, target, features, owner))
    }

    /// Sentinel rule for the root hypothesis: `<s>` translated as `<s>`.
    pub fn begin(vocab: &Vocabulary, label: &str) -> Self {
        let mut rule = Self::new(
            vocab.id(&bracket(label)),
            vec![Symbol::Word(START_ID)],
            vec![Symbol::Word(START_ID)],
            Vec::new(),
            "",
        );
        rule.kind = RuleKind::Begin;
        rule
    }

    /// Sentinel rule closing a derivation with `</s>`.
    pub fn end(vocab: &Vocabulary, label: &str) -> Self {
        let gap = Symbol::Gap {
            label: vocab.id(&bracket(label)),
            index: 0,
        };
        let mut rule = Self::new(
            vocab.id("[GOAL]"),
            vec![gap, Symbol::Word(STOP_ID)],
            vec![gap, Symbol::Word(STOP_ID)],
            Vec::new(),
            "",
        );
        rule.kind = RuleKind::End;
        rule
    }

    /// Pass-through phrase rule for a source word no grammar covers.
    pub fn oov(vocab: &Vocabulary, label: &str, word: WordId) -> Self {
        let label = vocab.id(&bracket(label));
        let gap = Symbol::Gap { label, index: 0 };
        Self::new(
            label,
            vec![gap, Symbol::Word(word)],
            vec![gap, Symbol::Word(word)],
            Vec::new(),
            OOV_OWNER,
        )
    }

    pub fn lhs(&self) -> WordId {
        self.lhs
    }

    pub fn source(&self) -> &[Symbol] {
        &self.source
    }

    pub fn target(&self) -> &[Symbol] {
        &self.target
    }

    pub fn features(&self) -> &[(String, f32)] {
        &self.features
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub fn is_sentinel(&self) -> bool {
        self.kind != RuleKind::Regular
    }

    /// Number of source terminals.
    pub fn source_words(&self) -> usize {
        self.source.len() - self.arity
    }

    pub fn target_terminals(&self) -> impl Iterator<Item = WordId> + '_ {
        self.target.iter().filter_map(|s| match s {
            Symbol::Word(id) => Some(*id),
            Symbol::Gap { .. } => None,
        })
    }

    /// Context-free cost estimate, computed on first use and cached.
    pub fn estimate_cost(&self, features: &FeatureSet, weights: &Weights) -> f32 {
        *self
            .estimate
            .get_or_init(|| features.estimate_rule(self, weights))
    }

    /// Target terminals only, space-joined.
    pub fn target_text(&self, vocab: &Vocabulary) -> String {
        vocab.words(&self.target_terminals().collect::<Vec<_>>())
    }

    /// Render back into the Hiero text format.
    pub fn display(&self, vocab: &Vocabulary) -> String {
        let features = self
            .features
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "{} ||| {} ||| {} ||| {}",
            vocab.words(&[self.lhs]),
            side_text(&self.source, vocab),
            side_text(&self.target, vocab),
            features
        )
    }
}

pub(crate) fn bracket(label: &str) -> String {
    format!("[{label}]")
}

fn side_text(side: &[Symbol], vocab: &Vocabulary) -> String {
    side.iter()
        .map(|s| match s {
            Symbol::Word(id) => vocab.words(&[*id]),
            Symbol::Gap { label, index } => {
                let label = vocab.words(&[*label]);
                let inner = label.trim_start_matches('[').trim_end_matches(']');
                format!("[{},{}]", inner, index + 1)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_side(text: &str, vocab: &Vocabulary) -> Result<Vec<Symbol>, RuleParseError> {
    let mut next_gap = 0usize;
    text.split_whitespace()
        .map(|token| {
            if token.len() > 2 && token.starts_with('[') && token.ends_with(']') {
                let inner = &token[1..token.len() - 1];
                let (label, index) = match inner.split_once(',') {
                    Some((label, index)) => {
                        let index: usize = index
                            .parse()
                            .map_err(|_| RuleParseError::BadGap(token.to_string()))?;
                        if index == 0 || label.is_empty() {
                            return Err(RuleParseError::BadGap(token.to_string()));
                        }
                        (label, index - 1)
                    }
                    None => (inner, next_gap),
                };
                next_gap += 1;
                Ok(Symbol::Gap {
                    label: vocab.id(&bracket(label)),
                    index,
                })
            } else {
                Ok(Symbol::Word(vocab.id(token)))
            }
        })
        .collect()
}

fn gap_indices(side: &[Symbol]) -> Vec<usize> {
    let mut indices: Vec<usize> = side
        .iter()
        .filter_map(|s| match s {
            Symbol::Gap { index, .. } => Some(*index),
            Symbol::Word(_) => None,
        })
        .collect();
    indices.sort_unstable();
    indices
}

fn parse_features(text: &str, owner: &str) -> Result<Vec<(String, f32)>, RuleParseError> {
    let mut unlabelled = 0usize;
    text.split_whitespace()
        .map(|token| {
            let bad = || RuleParseError::BadFeature(token.to_string());
            match token.split_once('=') {
                Some((name, value)) if !name.is_empty() => {
                    Ok((name.to_string(), value.parse().map_err(|_| bad())?))
                }
                Some(_) => Err(bad()),
                None => {
                    let value = token.parse().map_err(|_| bad())?;
                    let name = format!("tm_{owner}_{unlabelled}");
                    unlabelled += 1;
                    Ok((name, value))
                }
            }
        })
        .collect()
}
