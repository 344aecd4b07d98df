//! Cooperative cancellation signal with interruptible sleeps.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// One-shot cancellation flag. Once cancelled it stays cancelled.
pub struct CancelToken {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    /// Raise the flag and wake every sleeper.
    pub fn cancel(&self) {
        let mut guard = self.cancelled.lock().expect("cancel mutex poisoned");
        *guard = true;
        self.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().expect("cancel mutex poisoned")
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` when the full duration elapsed and `false` when the
    /// token was (or became) cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let guard = self.cancelled.lock().expect("cancel mutex poisoned");
        if *guard {
            return false;
        }
        if duration.is_zero() {
            return true;
        }
        // Spurious wakeups are absorbed by the predicate.
        let (guard, _) = self
            .signal
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .expect("cancel condvar wait failed");
        !*guard
    }
}
