//! Bounded pool of reusable workers with first-come, first-served acquisition.
//!
//! Every `acquire` takes a ticket; tickets are served strictly in order, so a
//! request that started waiting first gets the next free worker. A worker is
//! handed out as a [`Lease`] that returns it to the pool when dropped, which
//! makes release happen on every exit path, unwinding included.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

struct PoolState<W> {
    idle: VecDeque<W>,
    next_ticket: u64,
    serving: u64,
    waiting: usize,
    closed: bool,
}

pub struct WorkerPool<W> {
    state: Mutex<PoolState<W>>,
    changed: Condvar,
    capacity: usize,
}

impl<W> WorkerPool<W> {
    pub fn new(workers: Vec<W>) -> Arc<Self> {
        let capacity = workers.len();
        Arc::new(Self {
            state: Mutex::new(PoolState {
                idle: workers.into(),
                next_ticket: 0,
                serving: 0,
                waiting: 0,
                closed: false,
            }),
            changed: Condvar::new(),
            capacity,
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<W>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until it is this caller's turn and a worker is idle. Returns
    /// `None` once the pool is closed.
    pub fn acquire(self: &Arc<Self>) -> Option<Lease<W>> {
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiting += 1;
        while !state.closed && (state.serving != ticket || state.idle.is_empty()) {
            state = self.changed.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state.waiting -= 1;
        if state.closed {
            return None;
        }
        state.serving += 1;
        let worker = state.idle.pop_front();
        drop(state);
        // the next ticket holder may already have a worker available
        self.changed.notify_all();
        worker.map(|worker| Lease {
            pool: Arc::clone(self),
            worker: Some(worker),
        })
    }

    fn release(&self, worker: W) {
        self.lock().idle.push_back(worker);
        self.changed.notify_all();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Workers not currently leased.
    pub fn available(&self) -> usize {
        self.lock().idle.len()
    }

    /// Callers blocked in `acquire`.
    pub fn waiting(&self) -> usize {
        self.lock().waiting
    }

    /// Refuse further acquisitions and wake every waiter.
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Wait for every lease to come back, then take all workers out.
    pub fn drain(&self) -> Vec<W> {
        let mut state = self.lock();
        while state.idle.len() < self.capacity {
            state = self.changed.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state.idle.drain(..).collect()
    }
}

/// Exclusive use of one worker; dropping it returns the worker.
pub struct Lease<W> {
    pool: Arc<WorkerPool<W>>,
    worker: Option<W>,
}

impl<W> Deref for Lease<W> {
    type Target = W;

    fn deref(&self) -> &W {
        // only `drop` takes the worker out
        match &self.worker {
            Some(worker) => worker,
            None => unreachable!("lease used after release"),
        }
    }
}

impl<W> DerefMut for Lease<W> {
    fn deref_mut(&mut self) -> &mut W {
        match &mut self.worker {
            Some(worker) => worker,
            None => unreachable!("lease used after release"),
        }
    }
}

impl<W> Drop for Lease<W> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.release(worker);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_lease_returns_on_drop() {
        let pool = WorkerPool::new(vec![1, 2]);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(*a + *b, 3);
        assert_eq!(pool.available(), 0);
        drop(a);
        assert_eq!(pool.available(), 1);
        drop(b);
        assert_eq!(pool.available(), pool.capacity());
    }

    #[test]
    fn test_lease_returns_on_panic() {
        let pool = WorkerPool::new(vec![()]);
        let p = Arc::clone(&pool);
        let result = thread::spawn(move || {
            let _lease = p.acquire().unwrap();
            panic!("task failed");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_acquisition_is_fifo() {
        let pool = WorkerPool::new(vec![0u8]);
        let held = pool.acquire().unwrap();
        let (tx, rx) = mpsc::channel();
        let mut handles = Vec::new();
        for i in 0..4 {
            let p = Arc::clone(&pool);
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                let lease = p.acquire().unwrap();
                tx.send(i).unwrap();
                drop(lease);
            }));
            // the i-th waiter has its ticket before the next one starts
            wait_until(|| pool.waiting() == i + 1);
        }
        drop(held);
        for h in handles {
            h.join().unwrap();
        }
        let order: Vec<usize> = rx.try_iter().collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_close_wakes_waiters() {
        let pool = WorkerPool::new(vec![()]);
        let held = pool.acquire().unwrap();
        let p = Arc::clone(&pool);
        let waiter = thread::spawn(move || p.acquire().is_none());
        wait_until(|| pool.waiting() == 1);
        pool.close();
        assert!(waiter.join().unwrap());
        assert!(pool.acquire().is_none());
        drop(held);
        assert_eq!(pool.drain().len(), 1);
    }
}
