//! Search states of phrase-based decoding.
//!
//! A hypothesis is a node of the search hypergraph: a coverage vector, the
//! last consumed source position and the DP states of the stateful features.
//! Hypotheses that agree on those three are interchangeable for the rest of
//! the search and are recombined with [`Hypothesis::absorb`].

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::coverage::Coverage;
use crate::ff::DpState;
use crate::rule::Rule;

/// Index of a hypothesis in the per-sentence arena.
pub type NodeId = usize;

/// An incoming edge: the rule applied, the nodes it extends, and the scores
/// it was reached with.
#[derive(Debug, Clone)]
pub struct HyperEdge {
    pub rule: Arc<Rule>,
    pub tails: Vec<NodeId>,
    /// Source span `[i, j)` the rule consumed.
    pub span: (usize, usize),
    /// Weighted feature score added by this edge alone.
    pub transition_score: f32,
    /// Score of the best derivation ending in this edge.
    pub best_score: f32,
}

/// The part of a hypothesis that decides recombination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    last_source_index: usize,
    coverage: Coverage,
    dp_states: Option<Vec<DpState>>,
}

#[derive(Debug, Clone)]
pub struct Hypothesis {
    coverage: Coverage,
    last_source_index: usize,
    dp_states: Option<Vec<DpState>>,
    edges: Vec<HyperEdge>,
    best: usize,
    score: f32,
    future_cost: f32,
}

impl Hypothesis {
    /// The root: only `<s>` covered, each stateful feature's initial state.
    pub fn root(begin: Arc<Rule>, states: Vec<DpState>, sentence_len: usize) -> Self {
        Self {
            coverage: Coverage::root(sentence_len),
            last_source_index: 1,
            dp_states: Some(states),
            edges: vec![HyperEdge {
                rule: begin,
                tails: Vec::new(),
                span: (0, 1),
                transition_score: 0.0,
                best_score: 0.0,
            }],
            best: 0,
            score: 0.0,
            future_cost: 0.0,
        }
    }

    /// A hypothesis derived through `edge`. Returns `None` if a regular rule
    /// arrives without DP states.
    pub fn derive(
        coverage: Coverage,
        dp_states: Option<Vec<DpState>>,
        edge: HyperEdge,
        future_cost: f32,
    ) -> Option<Self> {
        if dp_states.is_none() && !edge.rule.is_sentinel() {
            return None;
        }
        Some(Self {
            coverage,
            last_source_index: edge.span.1,
            dp_states,
            score: edge.best_score,
            edges: vec![edge],
            best: 0,
            future_cost,
        })
    }

    pub fn coverage(&self) -> &Coverage {
        &self.coverage
    }

    /// One past the last consumed source position.
    pub fn last_source_index(&self) -> usize {
        self.last_source_index
    }

    pub fn dp_states(&self) -> Option<&[DpState]> {
        self.dp_states.as_deref()
    }

    pub fn dp_state(&self, index: usize) -> Option<&DpState> {
        self.dp_states.as_ref()?.get(index)
    }

    pub fn edges(&self) -> &[HyperEdge] {
        &self.edges
    }

    pub fn best_edge(&self) -> &HyperEdge {
        &self.edges[self.best]
    }

    pub fn rule(&self) -> &Arc<Rule> {
        &self.best_edge().rule
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn future_cost(&self) -> f32 {
        self.future_cost
    }

    pub fn signature(&self) -> Signature {
        Signature {
            last_source_index: self.last_source_index,
            coverage: self.coverage.clone(),
            dp_states: self.dp_states.clone(),
        }
    }

    /// Score used for beam pruning.
    pub fn beam_score(&self) -> f32 {
        self.score + self.future_cost
    }

    /// Fold an equivalent hypothesis into this one: the best score wins and
    /// every incoming edge is kept.
    pub fn absorb(&mut self, other: Hypothesis) {
        debug_assert!(*self == other, "absorbing a non-equivalent hypothesis");
        if other.score > self.score {
            self.best = self.edges.len() + other.best;
            self.score = other.score;
        }
        self.edges.extend(other.edges);
    }
}

/// Descending by score; the order of a beam.
pub fn by_descending_score(a: &Hypothesis, b: &Hypothesis) -> Ordering {
    b.score.total_cmp(&a.score)
}

impl PartialEq for Hypothesis {
    fn eq(&self, other: &Self) -> bool {
        self.last_source_index == other.last_source_index
            && self.coverage == other.coverage
            && self.dp_states == other.dp_states
    }
}

impl Eq for Hypothesis {}

impl Hash for Hypothesis {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.last_source_index.hash(state);
        self.coverage.hash(state);
        self.dp_states.hash(state);
    }
}
