//! Grammars: rule lookup by source side.
//!
//! `MemoryGrammar` is a trie over source symbols. It doubles as the runtime
//! custom grammar, so mutation goes through an internal lock.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::info;

use crate::rule::{Rule, RuleParseError, Symbol};
use crate::vocab::Vocabulary;

#[derive(Debug, Error)]
pub enum GrammarError {
    #[error("cannot read grammar {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("{path}:{line}: {source}")]
    Parse {
        path: String,
        line: usize,
        source: RuleParseError,
    },
}

pub trait Grammar: Send + Sync {
    /// Owner tag shared by every rule of this grammar.
    fn owner(&self) -> &str;

    /// Rules whose source side is exactly `source`.
    fn rules_for(&self, source: &[Symbol]) -> Vec<Arc<Rule>>;

    /// Every rule, breadth-first over the source trie.
    fn rules(&self) -> Vec<Arc<Rule>>;

    /// Number of unlabelled (dense) scores carried by the rules.
    fn num_dense_features(&self) -> usize;
}

#[derive(Default)]
struct TrieNode {
    children: HashMap<Symbol, TrieNode>,
    rules: Vec<Arc<Rule>>,
}

pub struct MemoryGrammar {
    owner: String,
    root: RwLock<TrieNode>,
    num_rules: AtomicUsize,
    num_dense: AtomicUsize,
}

impl MemoryGrammar {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            root: RwLock::new(TrieNode::default()),
            num_rules: AtomicUsize::new(0),
            num_dense: AtomicUsize::new(0),
        }
    }

    pub fn load(owner: &str, path: &Path, vocab: &Vocabulary) -> Result<Self, GrammarError> {
        let file = File::open(path).map_err(|source| GrammarError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let grammar = Self::from_reader(owner, BufReader::new(file), &path.display().to_string(), vocab)?;
        info!(owner, path = %path.display(), rules = grammar.len(), "loaded grammar");
        Ok(grammar)
    }

    pub fn from_reader<R: BufRead>(
        owner: &str,
        reader: R,
        path: &str,
        vocab: &Vocabulary,
    ) -> Result<Self, GrammarError> {
        let grammar = Self::new(owner);
        for (i, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| GrammarError::Io {
                path: path.to_string(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let rule = Rule::parse(&line, owner, vocab).map_err(|source| GrammarError::Parse {
                path: path.to_string(),
                line: i + 1,
                source,
            })?;
            grammar.add_rule(Arc::new(rule));
        }
        Ok(grammar)
    }

    pub fn add_rule(&self, rule: Arc<Rule>) {
        let dense = rule
            .features()
            .iter()
            .filter(|(name, _)| name.starts_with(&format!("tm_{}_", self.owner)))
            .count();
        self.num_dense.fetch_max(dense, Ordering::Relaxed);
        let mut root = self.root.write().unwrap_or_else(PoisonError::into_inner);
        let mut node = &mut *root;
        for symbol in rule.source() {
            node = node.children.entry(*symbol).or_default();
        }
        node.rules.push(rule);
        self.num_rules.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove the first rule at exactly `source` accepted by `matches`.
    pub fn remove_rule<F>(&self, source: &[Symbol], matches: F) -> Option<Arc<Rule>>
    where
        F: Fn(&Rule) -> bool,
    {
        let mut root = self.root.write().unwrap_or_else(PoisonError::into_inner);
        let mut node = &mut *root;
        for symbol in source {
            node = node.children.get_mut(symbol)?;
        }
        let pos = node.rules.iter().position(|r| matches(r))?;
        self.num_rules.fetch_sub(1, Ordering::Relaxed);
        Some(node.rules.remove(pos))
    }

    pub fn len(&self) -> usize {
        self.num_rules.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Grammar for MemoryGrammar {
    fn owner(&self) -> &str {
        &self.owner
    }

    fn rules_for(&self, source: &[Symbol]) -> Vec<Arc<Rule>> {
        let root = self.root.read().unwrap_or_else(PoisonError::into_inner);
        let mut node = &*root;
        for symbol in source {
            match node.children.get(symbol) {
                Some(child) => node = child,
                None => return Vec::new(),
            }
        }
        node.rules.clone()
    }

    fn rules(&self) -> Vec<Arc<Rule>> {
        let root = self.root.read().unwrap_or_else(PoisonError::into_inner);
        let mut out = Vec::with_capacity(self.len());
        let mut queue = VecDeque::from([&*root]);
        while let Some(node) = queue.pop_front() {
            out.extend(node.rules.iter().cloned());
            queue.extend(node.children.values());
        }
        out
    }

    fn num_dense_features(&self) -> usize {
        self.num_dense.load(Ordering::Relaxed)
    }
}
