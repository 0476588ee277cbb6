//! Bulkhead isolation: a non-blocking counting semaphore per command key.
//!
//! # Responsibilities
//! - Cap concurrent executions of one command
//! - Reject immediately when saturated (never queue)
//! - Release the slot when the execution actually finishes, even if the
//!   caller already gave up on it after a timeout

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Concurrent execution counter for one command.
#[derive(Debug, Default)]
pub struct Bulkhead {
    active: AtomicUsize,
}

impl Bulkhead {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of executions currently holding a permit.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Try to take a permit under `limit`. Returns `None` when saturated.
    ///
    /// The limit is passed per call so a hot-updated config applies at once.
    pub fn try_acquire(self: &Arc<Self>, limit: usize) -> Option<BulkheadPermit> {
        let mut prev = self.active.load(Ordering::Acquire);
        loop {
            if prev >= limit {
                return None;
            }
            match self.active.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(BulkheadPermit {
            bulkhead: self.clone(),
        })
    }
}

/// A RAII permit that frees its bulkhead slot on drop.
#[derive(Debug)]
pub struct BulkheadPermit {
    bulkhead: Arc<Bulkhead>,
}

impl Deref for BulkheadPermit {
    type Target = Bulkhead;
    fn deref(&self) -> &Self::Target {
        &self.bulkhead
    }
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        self.bulkhead.active.fetch_sub(1, Ordering::AcqRel);
    }
}
