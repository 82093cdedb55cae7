//! Capacity-bounded concurrency gate with live resize.
//!
//! A [`Gate`] wraps a [`tokio::sync::Semaphore`] behind a
//! [`parking_lot::RwLock`]. Resizing constructs a fresh semaphore and swaps
//! the reference: holders of permits from the old instance are unaffected and
//! release into the instance they acquired from; only future acquisitions
//! observe the new capacity.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug)]
struct GateInner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A swappable bounded concurrency gate.
#[derive(Debug)]
pub struct Gate {
    name: &'static str,
    inner: RwLock<Arc<GateInner>>,
}

/// A held gate slot. Dropping it releases the slot back into the semaphore
/// instance it was acquired from.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    capacity: usize,
}

impl GatePermit {
    /// Configured capacity of the gate instance this permit came from. A
    /// capacity of 1 means the holder is the only concurrent worker and the
    /// pipeline applies its post-release cooldown.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Gate {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            inner: RwLock::new(Arc::new(GateInner {
                semaphore: Arc::new(Semaphore::new(capacity.max(1))),
                capacity: capacity.max(1),
            })),
        }
    }

    /// Currently configured capacity (future acquisitions).
    pub fn capacity(&self) -> usize {
        self.inner.read().capacity
    }

    /// Wait for a slot.
    pub async fn acquire(&self) -> GatePermit {
        let inner = self.inner.read().clone();
        let permit = inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("gate semaphore closed");
        GatePermit {
            _permit: permit,
            capacity: inner.capacity,
        }
    }

    /// Swap in a fresh semaphore with the given capacity. In-flight holders
    /// are unaffected.
    pub fn resize(&self, capacity: usize) {
        let capacity = capacity.max(1);
        let old = {
            let mut guard = self.inner.write();
            let old = guard.capacity;
            *guard = Arc::new(GateInner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
            });
            old
        };
        if old != capacity {
            tracing::info!(gate = self.name, old, new = capacity, "Resized concurrency gate");
        }
    }
}
