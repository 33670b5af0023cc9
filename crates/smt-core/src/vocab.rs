//! Word interning shared by grammars, sentences and language models.
//!
//! Ids are dense and stable for the life of the vocabulary. Language-model
//! backends that keep their own id space are registered here and receive every
//! word as it is interned, including the words that were interned before they
//! were registered.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::lm::NgramBackend;

pub type WordId = u32;

pub const UNKNOWN_WORD: &str = "<unk>";
pub const START_SYM: &str = "<s>";
pub const STOP_SYM: &str = "</s>";

pub const UNKNOWN_ID: WordId = 0;
pub const START_ID: WordId = 1;
pub const STOP_ID: WordId = 2;

#[derive(Default)]
struct Table {
    words: Vec<String>,
    ids: HashMap<String, WordId>,
}

impl Table {
    fn push(&mut self, word: &str) -> WordId {
        let id = self.words.len() as WordId;
        self.words.push(word.to_string());
        self.ids.insert(word.to_string(), id);
        id
    }
}

pub struct Vocabulary {
    table: RwLock<Table>,
    listeners: RwLock<Vec<Arc<dyn NgramBackend>>>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl Vocabulary {
    pub fn new() -> Self {
        let mut table = Table::default();
        table.push(UNKNOWN_WORD);
        table.push(START_SYM);
        table.push(STOP_SYM);
        Self {
            table: RwLock::new(table),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Intern `word`, returning its id.
    pub fn id(&self, word: &str) -> WordId {
        if let Some(&id) = self.read_table().ids.get(word) {
            return id;
        }
        let id = {
            let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
            match table.ids.get(word) {
                Some(&id) => return id,
                None => table.push(word),
            }
        };
        for lm in self.listeners.read().unwrap_or_else(PoisonError::into_inner).iter() {
            lm.register_word(word, id);
        }
        id
    }

    /// Look up a word without interning it.
    pub fn get(&self, word: &str) -> Option<WordId> {
        self.read_table().ids.get(word).copied()
    }

    pub fn word(&self, id: WordId) -> Option<String> {
        self.read_table().words.get(id as usize).cloned()
    }

    /// Render a sequence of ids, unknown ids as `<unk>`.
    pub fn words(&self, ids: &[WordId]) -> String {
        let table = self.read_table();
        ids.iter()
            .map(|&id| {
                table
                    .words
                    .get(id as usize)
                    .map(String::as_str)
                    .unwrap_or(UNKNOWN_WORD)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn len(&self) -> usize {
        self.read_table().words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a backend and replay the current vocabulary into it.
    pub fn register_language_model(&self, lm: Arc<dyn NgramBackend>) {
        // Holding the listener lock across the replay keeps words interned
        // concurrently from being missed or delivered out of order.
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let table = self.read_table();
        let mut known = 0usize;
        for (id, word) in table.words.iter().enumerate() {
            if lm.register_word(word, id as WordId) {
                known += 1;
            }
        }
        debug!(words = table.words.len(), known, "registered language model vocabulary");
        drop(table);
        listeners.push(lm);
    }

    fn read_table(&self) -> std::sync::RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }
}
