#![cfg(test)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{state_of_ref, NgramBackend, PoolHandle, StateProb};
use crate::ff::NativeState;
use crate::vocab::{WordId, START_ID};

const STATE_BITS: u32 = 20;

#[derive(Default)]
struct Pools {
    next_id: i64,
    created: usize,
    live: HashMap<i64, Vec<Vec<WordId>>>,
}

/// In-memory n-gram scorer honouring the native contract.
///
/// Probabilities are looked up by word string with plain back-off (no
/// back-off weights). States are right contexts interned per pool; a state
/// handle encodes its pool, so states never leak across sentences.
pub struct ToyBackend {
    order: usize,
    ngrams: HashMap<String, f32>,
    words: Mutex<HashMap<WordId, String>>,
    pools: Mutex<Pools>,
    estimates: AtomicUsize,
    sequences: AtomicUsize,
}

impl ToyBackend {
    pub const UNSEEN: f32 = -7.0;

    pub fn new(order: usize) -> Self {
        Self::with_ngrams(order, &[])
    }

    pub fn with_ngrams(order: usize, ngrams: &[(&str, f32)]) -> Self {
        Self {
            order,
            ngrams: ngrams.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            words: Mutex::new(HashMap::new()),
            pools: Mutex::new(Pools {
                next_id: 1,
                ..Pools::default()
            }),
            estimates: AtomicUsize::new(0),
            sequences: AtomicUsize::new(0),
        }
    }

    pub fn registered(&self, id: WordId) -> Option<String> {
        self.words.lock().unwrap().get(&id).cloned()
    }

    pub fn live_pools(&self) -> usize {
        self.pools.lock().unwrap().live.len()
    }

    pub fn created_pools(&self) -> usize {
        self.pools.lock().unwrap().created
    }

    pub fn is_live(&self, pool: PoolHandle) -> bool {
        self.pools.lock().unwrap().live.contains_key(&pool.0)
    }

    pub fn estimate_calls(&self) -> usize {
        self.estimates.load(Ordering::SeqCst)
    }

    pub fn sequence_calls(&self) -> usize {
        self.sequences.load(Ordering::SeqCst)
    }

    fn context_of(&self, handle: u64) -> Vec<WordId> {
        let pool = (handle >> STATE_BITS) as i64;
        let index = (handle & ((1 << STATE_BITS) - 1)) as usize - 1;
        let pools = self.pools.lock().unwrap();
        let states = pools
            .live
            .get(&pool)
            .unwrap_or_else(|| panic!("state {handle} refers to dead pool {pool}"));
        states[index].clone()
    }

    fn intern(&self, pool: PoolHandle, context: Vec<WordId>) -> NativeState {
        let mut pools = self.pools.lock().unwrap();
        let states = pools
            .live
            .get_mut(&pool.0)
            .unwrap_or_else(|| panic!("scoring in dead pool {}", pool.0));
        let index = match states.iter().position(|s| *s == context) {
            Some(i) => i,
            None => {
                states.push(context);
                states.len() - 1
            }
        };
        NativeState(((pool.0 as u64) << STATE_BITS) | (index as u64 + 1))
    }

    /// Score `words` left to right. A negative entry replaces the context
    /// with whatever `on_state` returns for it.
    fn score(&self, words: &[i64], mut on_state: impl FnMut(u64) -> Vec<WordId>) -> (f32, Vec<WordId>) {
        let mut context: Vec<WordId> = Vec::new();
        let mut total = 0.0;
        for &w in words {
            if let Some(state) = state_of_ref(w) {
                context = on_state(state.0);
                continue;
            }
            let w = w as WordId;
            if !(w == START_ID && context.is_empty()) {
                let start = (context.len() + 1).saturating_sub(self.order);
                let mut ngram = context[start..].to_vec();
                ngram.push(w);
                total += self.prob(&ngram);
            }
            context.push(w);
        }
        let keep = self.order.saturating_sub(1);
        let start = context.len().saturating_sub(keep);
        (total, context[start..].to_vec())
    }
}

impl NgramBackend for ToyBackend {
    fn order(&self) -> usize {
        self.order
    }

    fn register_word(&self, word: &str, id: WordId) -> bool {
        self.words.lock().unwrap().insert(id, word.to_string());
        self.ngrams.contains_key(word)
    }

    fn prob(&self, ngram: &[WordId]) -> f32 {
        let words = self.words.lock().unwrap();
        let text: Vec<&str> = ngram
            .iter()
            .map(|id| words.get(id).map(String::as_str).unwrap_or("<unk>"))
            .collect();
        for start in 0..text.len() {
            if let Some(p) = self.ngrams.get(&text[start..].join(" ")) {
                return *p;
            }
        }
        Self::UNSEEN
    }

    fn sequence_prob(&self, words: &[WordId], start: usize) -> f32 {
        self.sequences.fetch_add(1, Ordering::SeqCst);
        (start..words.len())
            .map(|i| self.prob(&words[(i + 1).saturating_sub(self.order)..=i]))
            .sum()
    }

    fn prob_rule(&self, pool: PoolHandle, words: &[i64]) -> StateProb {
        let (prob, context) = self.score(words, |handle| self.context_of(handle));
        StateProb {
            state: self.intern(pool, context),
            prob,
        }
    }

    fn estimate_rule(&self, words: &[i64]) -> f32 {
        self.estimates.fetch_add(1, Ordering::SeqCst);
        self.score(words, |_| Vec::new()).0
    }

    fn create_pool(&self) -> PoolHandle {
        let mut pools = self.pools.lock().unwrap();
        let id = pools.next_id;
        pools.next_id += 1;
        pools.created += 1;
        pools.live.insert(id, Vec::new());
        PoolHandle(id)
    }

    fn destroy_pool(&self, pool: PoolHandle) {
        let removed = self.pools.lock().unwrap().live.remove(&pool.0);
        assert!(removed.is_some(), "pool {} destroyed twice", pool.0);
    }
}
