use std::cell::OnceCell;
use std::sync::Arc;

use tracing::debug;

use super::NgramBackend;

/// Identifier of a native memory pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolHandle(pub i64);

/// A native pool that is destroyed when dropped.
pub struct MemoryPool {
    handle: PoolHandle,
    backend: Arc<dyn NgramBackend>,
}

impl MemoryPool {
    pub fn new(backend: Arc<dyn NgramBackend>) -> Self {
        let handle = backend.create_pool();
        debug!(pool = handle.0, "created language-model pool");
        Self { handle, backend }
    }

    pub fn handle(&self) -> PoolHandle {
        self.handle
    }
}

impl Drop for MemoryPool {
    fn drop(&mut self) {
        self.backend.destroy_pool(self.handle);
        debug!(pool = self.handle.0, "destroyed language-model pool");
    }
}

/// Resources that live exactly as long as one sentence's decoding.
///
/// Each stateful feature gets a lazily created pool slot. Dropping the scope
/// destroys every pool it created, so it must outlive output extraction.
pub struct SentenceScope {
    sentence_id: u32,
    pools: Vec<OnceCell<MemoryPool>>,
}

impl SentenceScope {
    pub fn new(sentence_id: u32, slots: usize) -> Self {
        Self {
            sentence_id,
            pools: (0..slots).map(|_| OnceCell::new()).collect(),
        }
    }

    pub fn sentence_id(&self) -> u32 {
        self.sentence_id
    }

    /// The pool of `slot`, created on first use. `None` if the scope has no
    /// such slot.
    pub fn pool(&self, slot: usize, backend: &Arc<dyn NgramBackend>) -> Option<PoolHandle> {
        let cell = self.pools.get(slot)?;
        Some(
            cell.get_or_init(|| {
                debug!(sentence = self.sentence_id, slot, "lazily creating sentence pool");
                MemoryPool::new(Arc::clone(backend))
            })
            .handle(),
        )
    }

    pub fn live_pools(&self) -> usize {
        self.pools.iter().filter(|c| c.get().is_some()).count()
    }
}
