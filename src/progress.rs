//! Per-worker progress heartbeats and stall detection.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::types::WorkerId;

/// When a worker last finished a unit, stored as nanoseconds past a shared
/// epoch so that beating is a single atomic store.
pub struct Heartbeat {
    epoch: Instant,
    last_beat_ns: AtomicU64,
}

impl Heartbeat {
    pub fn new(epoch: Instant) -> Self {
        Self {
            epoch,
            last_beat_ns: AtomicU64::new(0),
        }
    }

    pub fn beat(&self) {
        self.beat_at(Instant::now());
    }

    fn beat_at(&self, now: Instant) {
        let ns = now.saturating_duration_since(self.epoch).as_nanos();
        self.last_beat_ns.store(u64::try_from(ns).unwrap_or(u64::MAX), Ordering::Release);
    }

    /// Time since the last beat, or since the epoch if there was none.
    pub fn quiet_for(&self, now: Instant) -> Duration {
        let last = Duration::from_nanos(self.last_beat_ns.load(Ordering::Acquire));
        now.saturating_duration_since(self.epoch).saturating_sub(last)
    }
}

/// Stall bookkeeping owned by the watchdog thread alone.
#[derive(Default)]
pub struct StallDetector {
    stalled: BTreeSet<WorkerId>,
}

impl StallDetector {
    /// Compare every heartbeat against `timeout`. Workers that beat again are
    /// cleared; returns the workers that went quiet since the last scan.
    pub fn scan<'a, I>(&mut self, beats: I, now: Instant, timeout: Duration) -> Vec<WorkerId>
    where
        I: IntoIterator<Item = (WorkerId, &'a Heartbeat)>,
    {
        let mut fresh = Vec::new();
        for (worker, heartbeat) in beats {
            if heartbeat.quiet_for(now) > timeout {
                if self.stalled.insert(worker) {
                    fresh.push(worker);
                }
            } else {
                self.stalled.remove(&worker);
            }
        }
        fresh
    }

    /// Workers currently considered stalled, in id order.
    pub fn into_stalled(self) -> Vec<WorkerId> {
        self.stalled.into_iter().collect()
    }
}
