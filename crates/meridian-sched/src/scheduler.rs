//! Work-stealing scheduler over many maps' work plans.
//!
//! Every worker runs the same claim loop: claim an item from any map whose
//! active phase still has unclaimed items (scanning round-robin from its own
//! offset), execute it, complete it. When nothing is claimable the worker
//! sleeps on the phase-completion signal of the in-flight map with the least
//! outstanding work, in short slices so that progress on other maps is
//! picked up too.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::ThreadPool;

use meridian_core::id::HostMapId;

use crate::error::{SchedulerError, WorkError};
use crate::plan::{PhaseKind, WorkPlan};
use crate::profiling::TickProfile;
#[cfg(feature = "profiling")]
use crate::profiling::PhaseTimers;
use crate::tracker::{MapTracker, Progress};

pub const DEFAULT_WAIT_SLICE: Duration = Duration::from_micros(200);

// ---------------------------------------------------------------------------
// Items, failures, report
// ---------------------------------------------------------------------------

/// One claimed unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub map: HostMapId,
    /// Index of the map's plan in the scheduler.
    pub slot: usize,
    pub phase: PhaseKind,
    /// Index among the map's non-empty phases.
    pub phase_index: usize,
    pub item: usize,
    /// Number of items in this phase.
    pub phase_items: usize,
}

/// A work item that returned an error or panicked. The item still counts as
/// completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkFailure {
    pub map: HostMapId,
    pub phase: PhaseKind,
    pub phase_index: usize,
    pub item: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleReport {
    pub failures: Vec<WorkFailure>,
    pub items_executed: usize,
    /// Filled in with the `profiling` feature.
    pub profile: Option<TickProfile>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Scheduler {
    trackers: Vec<MapTracker>,
    /// Maps with phases left.
    remaining: AtomicUsize,
    aborted: AtomicBool,
    wait_slice: Duration,
    executed: AtomicUsize,
    failures: Mutex<Vec<WorkFailure>>,
    fatal: Mutex<Option<SchedulerError>>,
    #[cfg(feature = "profiling")]
    timers: PhaseTimers,
}

impl Scheduler {
    /// Build fresh trackers for this tick's plans.
    pub fn new(plans: &[WorkPlan]) -> Self {
        let trackers: Vec<MapTracker> = plans.iter().map(MapTracker::new).collect();
        let remaining = trackers.iter().filter(|t| !t.is_done()).count();
        Self {
            trackers,
            remaining: AtomicUsize::new(remaining),
            aborted: AtomicBool::new(false),
            wait_slice: DEFAULT_WAIT_SLICE,
            executed: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
            fatal: Mutex::new(None),
            #[cfg(feature = "profiling")]
            timers: PhaseTimers::new(),
        }
    }

    /// Length of one blocking-claim sleep.
    pub fn with_wait_slice(mut self, slice: Duration) -> Self {
        self.wait_slice = slice.max(Duration::from_micros(1));
        self
    }

    pub fn map_count(&self) -> usize {
        self.trackers.len()
    }

    pub fn tracker(&self, slot: usize) -> Option<&MapTracker> {
        self.trackers.get(slot)
    }

    pub fn remaining_maps(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// All maps done, or the tick aborted.
    pub fn is_finished(&self) -> bool {
        self.is_aborted() || self.remaining_maps() == 0
    }

    // -----------------------------------------------------------------------
    // Claiming
    // -----------------------------------------------------------------------

    /// Non-blocking claim, scanning maps round-robin from `worker`'s offset.
    pub fn try_claim(&self, worker: usize) -> Option<WorkItem> {
        if self.is_aborted() || self.trackers.is_empty() {
            return None;
        }
        let n = self.trackers.len();
        let start = worker % n;
        (0..n).find_map(|k| {
            let slot = (start + k) % n;
            let tracker = &self.trackers[slot];
            let (phase_index, item) = tracker.try_claim()?;
            Some(WorkItem {
                map: tracker.map(),
                slot,
                phase: tracker.phase_kind(phase_index)?,
                phase_index,
                item,
                phase_items: tracker.phase_total(phase_index)?,
            })
        })
    }

    /// Claim, sleeping while in-flight maps have nothing claimable. Returns
    /// `None` once every map is done or the tick was aborted.
    pub fn try_claim_blocking(&self, worker: usize) -> Option<WorkItem> {
        loop {
            if let Some(item) = self.try_claim(worker) {
                return Some(item);
            }
            if self.is_finished() {
                return None;
            }
            let target = self
                .trackers
                .iter()
                .filter(|t| !t.is_done())
                .min_by_key(|t| t.outstanding())?;
            let seen = target.cursor();
            // Re-check after sampling the cursor so an advance in between
            // is either claimed here or wakes the wait below.
            if let Some(item) = self.try_claim(worker) {
                return Some(item);
            }
            target.wait_for_advance(seen, self.wait_slice);
        }
    }

    /// Mark an item completed. Advances the map's phase when it was the
    /// phase's last item.
    pub fn complete(&self, item: &WorkItem) -> Result<Progress, SchedulerError> {
        let tracker = self
            .trackers
            .get(item.slot)
            .ok_or(SchedulerError::UnknownMap(item.slot))?;
        let progress = tracker.complete(item.phase_index)?;
        if progress == Progress::MapDone {
            tracing::trace!(map = %item.map, "map finished");
            if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                self.wake_all();
            }
        }
        Ok(progress)
    }

    /// Stop handing out work and remember the first fatal error.
    pub fn abort(&self, err: SchedulerError) {
        tracing::error!(error = %err, "scheduler invariant violated, aborting tick");
        {
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                *fatal = Some(err);
            }
        }
        self.aborted.store(true, Ordering::Release);
        self.wake_all();
    }

    fn wake_all(&self) {
        for tracker in &self.trackers {
            tracker.wake_all();
        }
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run one item, catching errors and panics as [`WorkFailure`]s.
    pub fn execute<E>(&self, item: &WorkItem, executor: &E)
    where
        E: Fn(&WorkItem) -> Result<(), WorkError> + Sync,
    {
        #[cfg(feature = "profiling")]
        let started = Instant::now();

        let result = match panic::catch_unwind(AssertUnwindSafe(|| executor(item))) {
            Ok(result) => result,
            Err(payload) => Err(WorkError::Panicked(panic_message(payload.as_ref()))),
        };

        #[cfg(feature = "profiling")]
        self.timers.record(item.phase, started.elapsed());

        self.executed.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = result {
            tracing::warn!(
                map = %item.map,
                phase = item.phase.name(),
                item = item.item,
                error = %err,
                "work item failed"
            );
            self.failures.lock().push(WorkFailure {
                map: item.map,
                phase: item.phase,
                phase_index: item.phase_index,
                item: item.item,
                message: err.to_string(),
            });
        }
    }

    /// One worker's claim loop.
    pub fn worker_loop<E>(&self, worker: usize, executor: &E)
    where
        E: Fn(&WorkItem) -> Result<(), WorkError> + Sync,
    {
        while let Some(item) = self.try_claim_blocking(worker) {
            self.execute(&item, executor);
            if let Err(err) = self.complete(&item) {
                self.abort(err);
                break;
            }
        }
    }

    /// Run every plan to completion on `pool`, one claim loop per pool
    /// thread.
    pub fn run<E>(self, executor: E, pool: &ThreadPool) -> Result<ScheduleReport, SchedulerError>
    where
        E: Fn(&WorkItem) -> Result<(), WorkError> + Sync,
    {
        let started = Instant::now();
        let workers = pool.current_num_threads();
        tracing::debug!(maps = self.trackers.len(), workers, "scheduling tick");

        let this = &self;
        let executor = &executor;
        pool.scope(|scope| {
            for worker in 0..workers {
                scope.spawn(move |_| this.worker_loop(worker, executor));
            }
        });

        self.into_report(started.elapsed())
    }

    /// Collect the outcome. Fails with the first fatal error, if any.
    pub fn into_report(self, elapsed: Duration) -> Result<ScheduleReport, SchedulerError> {
        if let Some(err) = self.fatal.into_inner() {
            return Err(err);
        }
        #[cfg(feature = "profiling")]
        let profile = Some(self.timers.snapshot(0, elapsed));
        #[cfg(not(feature = "profiling"))]
        let profile = {
            let _ = elapsed;
            None
        };
        Ok(ScheduleReport {
            failures: self.failures.into_inner(),
            items_executed: self.executed.into_inner(),
            profile,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
