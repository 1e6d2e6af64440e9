//! Per-phase timing instrumentation.
//!
//! - [`TickProfile`] summarizes where worker time went on the most recent
//!   tick. The type is always available; it is only filled in when the
//!   `profiling` feature is enabled.
//! - [`PhaseTimers`] is the lock-free accumulator workers write into while
//!   the tick runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::plan::PhaseKind;

/// Accumulated item time per phase kind for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickProfile {
    /// Summed worker time per [`PhaseKind`], indexed by [`PhaseKind::index`].
    pub per_phase: [Duration; 5],
    /// Wall-clock time of the whole tick.
    pub total: Duration,
    pub tick: u64,
}

impl TickProfile {
    pub fn phase(&self, kind: PhaseKind) -> Duration {
        self.per_phase[kind.index()]
    }

    /// Returns the phase kind with the most accumulated worker time.
    pub fn bottleneck_phase(&self) -> (PhaseKind, Duration) {
        PhaseKind::ALL
            .into_iter()
            .map(|kind| (kind, self.phase(kind)))
            .fold((PhaseKind::Prepare, Duration::ZERO), |best, cur| {
                if cur.1 > best.1 { cur } else { best }
            })
    }

    /// Sum of per-phase worker time. Exceeds `total` when workers overlap.
    pub fn busy(&self) -> Duration {
        self.per_phase.iter().sum()
    }
}

#[derive(Debug, Default)]
pub struct PhaseTimers {
    nanos: [AtomicU64; 5],
}

impl PhaseTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: PhaseKind, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.nanos[kind.index()].fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn snapshot(&self, tick: u64, total: Duration) -> TickProfile {
        let mut profile = TickProfile {
            total,
            tick,
            ..TickProfile::default()
        };
        for (slot, nanos) in profile.per_phase.iter_mut().zip(&self.nanos) {
            *slot = Duration::from_nanos(nanos.load(Ordering::Relaxed));
        }
        profile
    }
}
