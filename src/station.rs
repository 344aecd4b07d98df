//! The assembly station: a ring of shared resources and the workers between them.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::config::StationConfig;
use crate::error::{Result, StationError};
use crate::progress::StallDetector;
use crate::resource::Resource;
use crate::types::{ResourceId, WorkerId, WorkerState};
use crate::worker::Worker;

// Holder id used when checking resources for leaks after shutdown.
const LEAK_CHECK_HOLDER: WorkerId = WorkerId::MAX;
// Floor for the stall watchdog polling interval.
const MIN_WATCHDOG_POLL_MS: u64 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Ready,
    Running,
    Stopped,
}

/// Final numbers for one worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerStats {
    pub id: WorkerId,
    pub completed_units: u64,
    pub state: WorkerState,
}

/// What a station reports once it has been stopped.
#[derive(Clone, Debug)]
pub struct StationReport {
    pub workers: Vec<WorkerStats>,
    pub total_units: u64,
    /// Resources still held after every worker stopped.
    pub leaked_resources: Vec<ResourceId>,
    /// Most workers ever counted on a single resource at once.
    pub peak_holders: usize,
    pub exclusion_violation: bool,
    /// Workers that broke the acquisition order; `None` when not audited.
    pub ordering_violations: Option<Vec<WorkerId>>,
    pub stalled_workers: Vec<WorkerId>,
    pub elapsed: Duration,
}

struct Watchdog {
    stop: Arc<CancelToken>,
    handle: thread::JoinHandle<Vec<WorkerId>>,
}

pub struct Station {
    config: StationConfig,
    resources: Vec<Arc<Resource>>,
    workers: Vec<Arc<Worker>>,
    handles: Vec<(WorkerId, thread::JoinHandle<()>)>,
    watchdog: Option<Watchdog>,
    stalled: Vec<WorkerId>,
    phase: Phase,
    started_at: Option<Instant>,
    elapsed: Duration,
}

impl Station {
    /// Build `config.workers` resources and wire one worker between each
    /// adjacent pair: worker `i` gets resource `i` on the left and
    /// resource `(i + 1) % n` on the right.
    pub fn new(config: StationConfig) -> Result<Self> {
        config.validate()?;
        let n = config.workers;

        let resources: Vec<Arc<Resource>> = (0..n).map(|id| Arc::new(Resource::new(id))).collect();
        let base_seed = config.seed.unwrap_or_else(rand::random);
        let epoch = Instant::now();

        let workers = (0..n)
            .map(|id| {
                let mut worker = Worker::new(
                    id,
                    Arc::clone(&resources[id]),
                    Arc::clone(&resources[(id + 1) % n]),
                    config.timing.clone(),
                    base_seed.wrapping_add(id as u64),
                );
                if config.stall_timeout.is_some() {
                    worker = worker.with_heartbeat(epoch);
                }
                if config.audit_order {
                    worker = worker.with_audit();
                }
                Arc::new(worker)
            })
            .collect();

        Ok(Self {
            config,
            resources,
            workers,
            handles: Vec::new(),
            watchdog: None,
            stalled: Vec::new(),
            phase: Phase::Ready,
            started_at: None,
            elapsed: Duration::ZERO,
        })
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    #[allow(dead_code)]
    pub fn resources(&self) -> &[Arc<Resource>] {
        &self.resources
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    /// Current completed-unit count of every worker, in id order.
    pub fn unit_counts(&self) -> Vec<u64> {
        self.workers.iter().map(|w| w.completed_units()).collect()
    }

    /// Launch every worker on its own thread.
    pub fn start(&mut self) -> Result<()> {
        match self.phase {
            Phase::Running => return Err(StationError::AlreadyRunning),
            Phase::Stopped => return Err(StationError::AlreadyStopped),
            Phase::Ready => {}
        }
        info!(
            workers = self.workers.len(),
            "starting station; each worker shares resources with its neighbours"
        );
        self.phase = Phase::Running;
        self.started_at = Some(Instant::now());

        // Quiet time is measured from start, not from construction.
        for heartbeat in self.workers.iter().filter_map(|w| w.heartbeat()) {
            heartbeat.beat();
        }

        let workers = self.workers.clone();
        for worker in &workers {
            let name = format!("worker-{}", worker.id());
            let runner = Arc::clone(worker);
            match thread::Builder::new()
                .name(name.clone())
                .spawn(move || runner.run())
            {
                Ok(handle) => self.handles.push((worker.id(), handle)),
                Err(source) => {
                    // Leave no half-started ring behind.
                    let _ = self.shutdown();
                    return Err(StationError::Spawn { name, source });
                }
            }
        }

        if let Some(timeout) = self.config.stall_timeout {
            match self.spawn_watchdog(timeout) {
                Ok(watchdog) => self.watchdog = Some(watchdog),
                Err(err) => {
                    let _ = self.shutdown();
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Cancel every worker, wait for all of them to finish, then report.
    ///
    /// Safe to call more than once; later calls just rebuild the report.
    pub fn stop(&mut self) -> Result<StationReport> {
        if self.phase != Phase::Stopped {
            info!("stopping station");
            self.shutdown()?;
        }
        Ok(self.report())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.phase = Phase::Stopped;
        for worker in &self.workers {
            worker.cancel();
        }
        for resource in &self.resources {
            resource.wake_waiters();
        }

        let mut panicked = None;
        for (id, handle) in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!(worker = id, "worker thread panicked");
                panicked.get_or_insert(id);
            }
        }
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.stop.cancel();
            match watchdog.handle.join() {
                Ok(stalled) => self.stalled = stalled,
                Err(_) => warn!("stall watchdog panicked"),
            }
        }
        if let Some(started) = self.started_at.take() {
            self.elapsed = started.elapsed();
        }

        match panicked {
            Some(id) => Err(StationError::WorkerPanicked(id)),
            None => Ok(()),
        }
    }

    fn spawn_watchdog(&self, timeout: Duration) -> Result<Watchdog> {
        let stop = Arc::new(CancelToken::new());
        let poll = (timeout / 4).max(Duration::from_millis(MIN_WATCHDOG_POLL_MS));
        let workers = self.workers.clone();
        let token = Arc::clone(&stop);
        let name = "stall-watchdog".to_string();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut detector = StallDetector::default();
                while token.sleep(poll) {
                    let beats = workers
                        .iter()
                        .filter_map(|w| w.heartbeat().map(|beat| (w.id(), beat)));
                    for worker in detector.scan(beats, Instant::now(), timeout) {
                        warn!(worker, ?timeout, "worker made no progress");
                    }
                }
                detector.into_stalled()
            })
            .map_err(|source| StationError::Spawn { name, source })?;
        Ok(Watchdog { stop, handle })
    }

    /// Resources that cannot be taken right now. Only meaningful once every
    /// worker has stopped.
    fn held_resources(&self) -> Vec<ResourceId> {
        self.resources
            .iter()
            .filter(|resource| {
                if resource.try_acquire(LEAK_CHECK_HOLDER) {
                    resource.release(LEAK_CHECK_HOLDER);
                    false
                } else {
                    true
                }
            })
            .map(|resource| resource.id())
            .collect()
    }

    fn report(&self) -> StationReport {
        let workers: Vec<WorkerStats> = self
            .workers
            .iter()
            .map(|worker| WorkerStats {
                id: worker.id(),
                completed_units: worker.completed_units(),
                state: worker.state(),
            })
            .collect();
        let total_units = workers.iter().map(|w| w.completed_units).sum();
        let peak_holders = self
            .resources
            .iter()
            .map(|r| r.peak_occupancy())
            .max()
            .unwrap_or(0);
        let ordering_violations = self.config.audit_order.then(|| {
            self.workers
                .iter()
                .filter(|w| w.audit_violations().is_some_and(|count| count > 0))
                .map(|w| w.id())
                .collect()
        });
        StationReport {
            workers,
            total_units,
            leaked_resources: self.held_resources(),
            peak_holders,
            exclusion_violation: peak_holders > 1,
            ordering_violations,
            stalled_workers: self.stalled.clone(),
            elapsed: self.elapsed,
        }
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        if self.phase == Phase::Running {
            let _ = self.shutdown();
        }
    }
}
