use meridian_core::id::HostMapId;

use crate::plan::PhaseKind;

/// Failure of a single work item. Recorded and logged; the tick goes on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkError {
    #[error("host callback failed: {0}")]
    Host(String),
    #[error("work item panicked: {0}")]
    Panicked(String),
}

impl WorkError {
    pub fn host(message: impl Into<String>) -> Self {
        Self::Host(message.into())
    }
}

/// Worker pool construction errors.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker count must be at least 1")]
    ZeroWorkers,
    #[error("failed to build worker pool: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),
}

/// Scheduling invariant violations. Fatal: the tick is aborted.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(
        "{map} phase {phase_index} ({phase:?}) completed {completed} items of {total}"
    )]
    CompletionOverflow {
        map: HostMapId,
        phase: PhaseKind,
        phase_index: usize,
        completed: usize,
        total: usize,
    },
    #[error("{map} completed an item of phase {phase_index} while phase {current} is active")]
    PhaseOutOfOrder {
        map: HostMapId,
        phase_index: usize,
        current: usize,
    },
    #[error("no map in scheduler slot {0}")]
    UnknownMap(usize),
    #[error("{map} has no phase {phase_index}")]
    UnknownPhase { map: HostMapId, phase_index: usize },
    #[error(transparent)]
    Pool(#[from] PoolError),
}
