//! Error types for station setup and lifecycle.

use std::io;

use thiserror::Error;

use crate::types::WorkerId;

#[derive(Debug, Error)]
pub enum StationError {
    /// A ring needs at least one worker.
    #[error("station needs at least one worker, got {0}")]
    EmptyRing(usize),

    /// A timing window whose lower bound exceeds its upper bound.
    #[error("invalid {name} window: min {min} exceeds max {max}")]
    InvalidWindow {
        name: &'static str,
        min: u64,
        max: u64,
    },

    #[error("station is already running")]
    AlreadyRunning,

    #[error("station has been stopped and cannot be restarted")]
    AlreadyStopped,

    #[error("failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("worker {0} panicked")]
    WorkerPanicked(WorkerId),
}

pub type Result<T> = std::result::Result<T, StationError>;
