//! Exclusive shared resources placed between neighbouring workers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use tracing::error;

use crate::cancel::CancelToken;
use crate::types::{ResourceId, WorkerId};

// Upper bound on how long a cancelled waiter can stay parked if it misses a wake.
const CANCEL_POLL_MS: u64 = 10;

/// A single tool on the ring. At most one worker holds it at a time.
pub struct Resource {
    id: ResourceId,
    holder: Mutex<Option<WorkerId>>,
    available: Condvar,
    // Holders as counted by workers outside the lock; exceeds 1 only if
    // exclusion is broken.
    occupancy: AtomicUsize,
    peak_occupancy: AtomicUsize,
}

impl Resource {
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            holder: Mutex::new(None),
            available: Condvar::new(),
            occupancy: AtomicUsize::new(0),
            peak_occupancy: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Block until the resource is free, then take it for `worker`.
    #[allow(dead_code)]
    pub fn acquire(&self, worker: WorkerId) {
        let mut guard = self.holder.lock().expect("resource mutex poisoned");
        while guard.is_some() {
            guard = self.available.wait(guard).expect("resource condvar wait failed");
        }
        *guard = Some(worker);
    }

    /// Like [`Resource::acquire`], but gives up once `cancel` fires.
    ///
    /// Returns `false` without taking the resource when cancelled. A pending
    /// cancellation wins even if the resource happens to be free.
    pub fn acquire_or_cancel(&self, worker: WorkerId, cancel: &CancelToken) -> bool {
        let poll = Duration::from_millis(CANCEL_POLL_MS);
        let mut guard = self.holder.lock().expect("resource mutex poisoned");
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if guard.is_none() {
                *guard = Some(worker);
                return true;
            }
            let (next, _) = self
                .available
                .wait_timeout(guard, poll)
                .expect("resource condvar wait failed");
            guard = next;
        }
    }

    /// Take the resource only if it is free right now.
    pub fn try_acquire(&self, worker: WorkerId) -> bool {
        let mut guard = self.holder.lock().expect("resource mutex poisoned");
        if guard.is_some() {
            return false;
        }
        *guard = Some(worker);
        true
    }

    /// Free the resource. Only the current holder may release it.
    pub fn release(&self, worker: WorkerId) -> bool {
        let mut guard = self.holder.lock().expect("resource mutex poisoned");
        match *guard {
            Some(owner) if owner == worker => {
                *guard = None;
                self.available.notify_all();
                true
            }
            Some(owner) => {
                if !cfg!(debug_assertions) {
                    error!(resource = self.id, worker, owner, "release by non-holder");
                }
                debug_assert!(
                    false,
                    "resource release by non-holder: resource={} worker={worker} owner={owner}",
                    self.id
                );
                false
            }
            None => {
                if !cfg!(debug_assertions) {
                    error!(resource = self.id, worker, "release of a free resource");
                }
                debug_assert!(
                    false,
                    "resource release while free: resource={} worker={worker}",
                    self.id
                );
                false
            }
        }
    }

    #[allow(dead_code)]
    pub fn holder(&self) -> Option<WorkerId> {
        *self.holder.lock().expect("resource mutex poisoned")
    }

    /// Called by a worker right after acquiring.
    pub fn note_entered(&self) {
        let holders = self.occupancy.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_occupancy.fetch_max(holders, Ordering::SeqCst);
    }

    /// Called by a worker right before releasing.
    pub fn note_leaving(&self) {
        self.occupancy.fetch_sub(1, Ordering::SeqCst);
    }

    /// Most holders ever counted at once.
    pub fn peak_occupancy(&self) -> usize {
        self.peak_occupancy.load(Ordering::SeqCst)
    }

    /// Wake every blocked acquirer so it re-checks its cancel token.
    pub fn wake_waiters(&self) {
        let _guard = self.holder.lock().expect("resource mutex poisoned");
        self.available.notify_all();
    }
}
