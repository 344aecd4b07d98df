//! Workers on the ring and their prepare/acquire/work/release cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::config::Timing;
use crate::progress::Heartbeat;
use crate::resource::Resource;
use crate::trace::OrderAudit;
use crate::types::{WorkerId, WorkerState};

#[derive(Debug, PartialEq, Eq)]
enum CycleOutcome {
    Finished,
    Cancelled,
}

pub struct Worker {
    id: WorkerId,
    left: Arc<Resource>,
    right: Arc<Resource>,
    timing: Timing,
    seed: u64,
    completed: AtomicU64,
    state: Mutex<WorkerState>,
    cancel: CancelToken,
    heartbeat: Option<Heartbeat>,
    // Only the worker's own thread touches this while it runs.
    audit: Option<Mutex<OrderAudit>>,
}

/// A resource held for the current cycle. Dropping it hands the resource back.
struct Hold<'a> {
    worker: &'a Worker,
    resource: &'a Resource,
}

impl Drop for Hold<'_> {
    fn drop(&mut self) {
        self.worker.give_back(self.resource);
    }
}

impl Worker {
    pub fn new(
        id: WorkerId,
        left: Arc<Resource>,
        right: Arc<Resource>,
        timing: Timing,
        seed: u64,
    ) -> Self {
        Self {
            id,
            left,
            right,
            timing,
            seed,
            completed: AtomicU64::new(0),
            state: Mutex::new(WorkerState::Idle),
            cancel: CancelToken::new(),
            heartbeat: None,
            audit: None,
        }
    }

    /// Beat after every finished unit so a watchdog can spot stalls.
    pub fn with_heartbeat(mut self, epoch: Instant) -> Self {
        self.heartbeat = Some(Heartbeat::new(epoch));
        self
    }

    /// Check every acquire and release against the ordering rule.
    pub fn with_audit(mut self) -> Self {
        self.audit = Some(Mutex::new(OrderAudit::default()));
        self
    }

    pub fn heartbeat(&self) -> Option<&Heartbeat> {
        self.heartbeat.as_ref()
    }

    /// Ordering-rule breaks seen so far; `None` when not audited.
    pub fn audit_violations(&self) -> Option<u64> {
        self.audit
            .as_ref()
            .map(|audit| audit.lock().expect("order audit mutex poisoned").violations())
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn completed_units(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().expect("worker state mutex poisoned")
    }

    /// Ask the worker to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The two resources in the order they must be taken: lower id first.
    ///
    /// In a one-worker ring both sides are the same resource, so there is no
    /// second one to take.
    pub fn acquisition_order(&self) -> (&Arc<Resource>, Option<&Arc<Resource>>) {
        let (low, high) = if self.left.id() <= self.right.id() {
            (&self.left, &self.right)
        } else {
            (&self.right, &self.left)
        };
        if low.id() == high.id() {
            (low, None)
        } else {
            (low, Some(high))
        }
    }

    /// Run cycles until cancelled. Blocks the calling thread.
    pub fn run(&self) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        debug!(worker = self.id, "starting work");
        while !self.cancel.is_cancelled() {
            if self.cycle(&mut rng) == CycleOutcome::Cancelled {
                break;
            }
        }
        self.set_state(WorkerState::Cancelled);
        debug!(
            worker = self.id,
            units = self.completed_units(),
            "cancelled, finishing work"
        );
    }

    fn cycle(&self, rng: &mut StdRng) -> CycleOutcome {
        self.set_state(WorkerState::Preparing);
        debug!(worker = self.id, "preparing parts");
        if !self.cancel.sleep(self.timing.prepare_delay(rng)) {
            return CycleOutcome::Cancelled;
        }

        let (first, second) = self.acquisition_order();
        self.set_state(WorkerState::AcquiringFirst);
        debug!(worker = self.id, "requesting resources");
        let Some(first_hold) = self.take(first) else {
            return CycleOutcome::Cancelled;
        };

        let second_hold = match second {
            Some(second) => {
                if !self.cancel.sleep(self.timing.handoff()) {
                    return CycleOutcome::Cancelled;
                }
                self.set_state(WorkerState::AcquiringSecond);
                match self.take(second) {
                    Some(hold) => Some(hold),
                    None => return CycleOutcome::Cancelled,
                }
            }
            None => None,
        };

        self.set_state(WorkerState::Working);
        let unit = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.record_audit(|audit| audit.completed(unit));
        debug!(worker = self.id, unit, "assembling unit");
        let finished = self.cancel.sleep(self.timing.work_delay(rng));
        if finished {
            if let Some(heartbeat) = &self.heartbeat {
                heartbeat.beat();
            }
            debug!(worker = self.id, unit, "unit finished");
        }

        self.set_state(WorkerState::Releasing);
        drop(second_hold);
        drop(first_hold);

        if finished {
            CycleOutcome::Finished
        } else {
            CycleOutcome::Cancelled
        }
    }

    fn take<'a>(&'a self, resource: &'a Resource) -> Option<Hold<'a>> {
        if !resource.acquire_or_cancel(self.id, &self.cancel) {
            debug!(worker = self.id, resource = resource.id(), "gave up waiting");
            return None;
        }
        resource.note_entered();
        self.record_audit(|audit| audit.acquired(resource.id()));
        debug!(worker = self.id, resource = resource.id(), "resource acquired");
        Some(Hold {
            worker: self,
            resource,
        })
    }

    fn give_back(&self, resource: &Resource) {
        self.record_audit(|audit| audit.released(resource.id()));
        resource.note_leaving();
        if resource.release(self.id) {
            debug!(worker = self.id, resource = resource.id(), "resource released");
        } else {
            warn!(worker = self.id, resource = resource.id(), "release refused");
        }
    }

    fn record_audit(&self, event: impl FnOnce(&mut OrderAudit)) {
        if let Some(audit) = &self.audit {
            event(&mut *audit.lock().expect("order audit mutex poisoned"));
        }
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock().expect("worker state mutex poisoned") = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DelayWindow;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn fast_timing() -> Timing {
        Timing {
            time_unit: Duration::from_micros(100),
            prepare: DelayWindow::new(5, 20),
            work: DelayWindow::new(3, 10),
            handoff_units: 1,
        }
    }

    fn ring(size: usize) -> Vec<Arc<Resource>> {
        (0..size).map(|id| Arc::new(Resource::new(id))).collect()
    }

    #[test]
    fn wraparound_worker_takes_lower_id_first() {
        let resources = ring(5);
        let worker = Worker::new(
            4,
            Arc::clone(&resources[4]),
            Arc::clone(&resources[0]),
            fast_timing(),
            1,
        );
        let (first, second) = worker.acquisition_order();
        assert_eq!(first.id(), 0);
        assert_eq!(second.map(|r| r.id()), Some(4));

        let inner = Worker::new(
            1,
            Arc::clone(&resources[1]),
            Arc::clone(&resources[2]),
            fast_timing(),
            1,
        );
        let (first, second) = inner.acquisition_order();
        assert_eq!(first.id(), 1);
        assert_eq!(second.map(|r| r.id()), Some(2));
    }

    #[test]
    fn single_resource_ring_takes_it_once() {
        let resources = ring(1);
        let worker = Worker::new(
            0,
            Arc::clone(&resources[0]),
            Arc::clone(&resources[0]),
            fast_timing(),
            1,
        );
        let (first, second) = worker.acquisition_order();
        assert_eq!(first.id(), 0);
        assert!(second.is_none());
    }

    #[test]
    fn uncontended_worker_completes_units_and_releases() {
        let resources = ring(2);
        let epoch = Instant::now();
        let worker = Arc::new(
            Worker::new(
                0,
                Arc::clone(&resources[0]),
                Arc::clone(&resources[1]),
                fast_timing(),
                11,
            )
            .with_heartbeat(epoch)
            .with_audit(),
        );
        assert_eq!(worker.state(), WorkerState::Idle);

        let runner = Arc::clone(&worker);
        let handle = thread::spawn(move || runner.run());
        thread::sleep(Duration::from_millis(60));
        worker.cancel();
        handle.join().expect("worker thread panicked");

        assert!(worker.completed_units() > 0);
        assert_eq!(worker.state(), WorkerState::Cancelled);
        assert!(resources.iter().all(|r| r.holder().is_none()));
        assert!(resources.iter().all(|r| r.peak_occupancy() == 1));
        assert_eq!(worker.audit_violations(), Some(0));
        let heartbeat = worker.heartbeat().expect("heartbeat enabled");
        assert!(heartbeat.quiet_for(Instant::now()) < epoch.elapsed());
    }

    #[test]
    fn cancel_while_blocked_releases_first_resource() {
        let resources = ring(2);
        let worker = Arc::new(
            Worker::new(
                0,
                Arc::clone(&resources[0]),
                Arc::clone(&resources[1]),
                fast_timing(),
                3,
            )
            .with_audit(),
        );
        // Someone else sits on the higher-id resource for the whole test.
        assert!(resources[1].try_acquire(99));

        let (done_tx, done_rx) = mpsc::channel();
        let runner = Arc::clone(&worker);
        let handle = thread::spawn(move || {
            runner.run();
            done_tx.send(()).expect("done");
        });

        let mut waited = Duration::ZERO;
        while worker.state() != WorkerState::AcquiringSecond && waited < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(1));
            waited += Duration::from_millis(1);
        }
        assert_eq!(worker.state(), WorkerState::AcquiringSecond);
        assert_eq!(resources[0].holder(), Some(0));

        worker.cancel();
        resources[1].wake_waiters();
        done_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("blocked worker did not unwind");
        handle.join().expect("worker thread panicked");

        assert_eq!(worker.state(), WorkerState::Cancelled);
        assert_eq!(worker.completed_units(), 0);
        assert_eq!(resources[0].holder(), None);
        assert_eq!(resources[1].holder(), Some(99));
        assert_eq!(worker.audit_violations(), Some(0));
        assert!(resources[1].release(99));
    }

    #[test]
    fn cancel_before_run_does_nothing() {
        let resources = ring(2);
        let worker = Worker::new(
            1,
            Arc::clone(&resources[1]),
            Arc::clone(&resources[0]),
            fast_timing(),
            5,
        );
        assert!(worker.heartbeat().is_none());
        assert!(worker.audit_violations().is_none());
        worker.cancel();
        worker.run();
        assert_eq!(worker.completed_units(), 0);
        assert_eq!(worker.state(), WorkerState::Cancelled);
    }
}
