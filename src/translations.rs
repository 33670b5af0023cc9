//! Ordered, blocking collection of one request's translations.
//!
//! Workers record results as they finish, in any order; the consumer reads
//! them strictly by input position. The dispatcher signals the end exactly
//! once with the number of sentences it handed out.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::translation::Translation;

#[derive(Default)]
struct Slots {
    ready: BTreeMap<usize, Translation>,
    next: usize,
    total: Option<usize>,
}

/// Shared handle; clones observe the same collection.
#[derive(Clone, Default)]
pub struct Translations {
    inner: Arc<(Mutex<Slots>, Condvar)>,
}

impl Translations {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the result for input position `position`.
    pub fn record(&self, position: usize, translation: Translation) {
        let mut slots = self.lock();
        if position < slots.next || slots.ready.contains_key(&position) {
            warn!(position, id = translation.id(), "translation recorded twice, keeping the first");
            return;
        }
        slots.ready.insert(position, translation);
        drop(slots);
        self.inner.1.notify_all();
    }

    /// End of input: `total` sentences were dispatched.
    pub fn finish(&self, total: usize) {
        let mut slots = self.lock();
        if slots.total.is_some() {
            warn!(total, "request finished twice");
            return;
        }
        slots.total = Some(total);
        drop(slots);
        self.inner.1.notify_all();
    }

    /// Number of results recorded but not yet consumed.
    pub fn pending(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_finished(&self) -> bool {
        let slots = self.lock();
        slots.total.is_some_and(|t| slots.next >= t)
    }
}

/// Blocks until the next translation in input order is available.
impl Iterator for Translations {
    type Item = Translation;

    fn next(&mut self) -> Option<Translation> {
        let (lock, ready) = &*self.inner;
        let mut slots = lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let next = slots.next;
            if let Some(translation) = slots.ready.remove(&next) {
                slots.next += 1;
                return Some(translation);
            }
            if slots.total.is_some_and(|t| next >= t) {
                return None;
            }
            slots = ready.wait(slots).unwrap_or_else(PoisonError::into_inner);
        }
    }
}
