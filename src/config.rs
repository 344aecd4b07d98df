//! Station configuration: ring size and the timing model.

use std::time::Duration;

use rand::Rng;

use crate::error::{Result, StationError};

pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_TIME_UNIT: Duration = Duration::from_millis(1);
pub const DEFAULT_PREPARE: DelayWindow = DelayWindow::new(500, 2000);
pub const DEFAULT_WORK: DelayWindow = DelayWindow::new(300, 1000);
pub const DEFAULT_HANDOFF_UNITS: u64 = 50;

/// Inclusive range of delays, expressed in time units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DelayWindow {
    pub min: u64,
    pub max: u64,
}

impl DelayWindow {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    fn validate(&self, name: &'static str) -> Result<()> {
        if self.min > self.max {
            return Err(StationError::InvalidWindow {
                name,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    fn sample_units<R: Rng>(&self, rng: &mut R) -> u64 {
        rng.gen_range(self.min..=self.max)
    }
}

/// How long each simulated phase of a cycle takes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timing {
    /// Wall-clock length of one time unit.
    pub time_unit: Duration,
    pub prepare: DelayWindow,
    pub work: DelayWindow,
    /// Pause between taking the first and the second resource.
    pub handoff_units: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            time_unit: DEFAULT_TIME_UNIT,
            prepare: DEFAULT_PREPARE,
            work: DEFAULT_WORK,
            handoff_units: DEFAULT_HANDOFF_UNITS,
        }
    }
}

impl Timing {
    fn units(&self, units: u64) -> Duration {
        self.time_unit.saturating_mul(u32::try_from(units).unwrap_or(u32::MAX))
    }

    pub fn prepare_delay<R: Rng>(&self, rng: &mut R) -> Duration {
        self.units(self.prepare.sample_units(rng))
    }

    pub fn work_delay<R: Rng>(&self, rng: &mut R) -> Duration {
        self.units(self.work.sample_units(rng))
    }

    pub fn handoff(&self) -> Duration {
        self.units(self.handoff_units)
    }

    /// Longest possible uncontended cycle.
    pub fn max_cycle(&self) -> Duration {
        self.units(
            self.prepare
                .max
                .saturating_add(self.handoff_units)
                .saturating_add(self.work.max),
        )
    }

    fn validate(&self) -> Result<()> {
        self.prepare.validate("prepare")?;
        self.work.validate("work")
    }
}

/// Everything needed to build a [`crate::station::Station`].
#[derive(Clone, Debug)]
pub struct StationConfig {
    pub workers: usize,
    pub timing: Timing,
    /// Base seed for per-worker RNGs; entropy when absent.
    pub seed: Option<u64>,
    /// Give each worker an acquisition-order audit.
    pub audit_order: bool,
    /// Flag workers that finish no unit within this long.
    pub stall_timeout: Option<Duration>,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            timing: Timing::default(),
            seed: None,
            audit_order: false,
            stall_timeout: None,
        }
    }
}

impl StationConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_audit(mut self, audit_order: bool) -> Self {
        self.audit_order = audit_order;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers < 1 {
            return Err(StationError::EmptyRing(self.workers));
        }
        self.timing.validate()
    }
}
