//! Shared identifiers and the worker state model used across the station.

use std::fmt;

/// Identifier of a worker; also its index in the ring.
pub type WorkerId = usize;
/// Identifier of a shared resource; also its index in the ring.
pub type ResourceId = usize;

/// Phase a worker is currently in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Preparing,
    AcquiringFirst,
    AcquiringSecond,
    Working,
    Releasing,
    /// Terminal: the worker observed cancellation and released everything.
    Cancelled,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Idle => "idle",
            WorkerState::Preparing => "preparing",
            WorkerState::AcquiringFirst => "acquiring-first",
            WorkerState::AcquiringSecond => "acquiring-second",
            WorkerState::Working => "working",
            WorkerState::Releasing => "releasing",
            WorkerState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
