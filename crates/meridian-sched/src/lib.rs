//! Multi-phase, work-stealing tick scheduler for the Meridian runtime.
//!
//! Every registered map gets a [`WorkPlan`] per tick: an ordered list of
//! phases (prepare, power solve, SubUnits or legacy chunks, finalize). A
//! fixed pool of workers claims items from any map whose current phase still
//! has unclaimed work. A map's phase `k+1` never starts before every item of
//! phase `k` has completed, but different maps advance independently.
//!
//! # Design
//!
//! - Claiming is a single atomic increment per item; phase advancement is
//!   done by whichever worker completes a phase's last item.
//! - Host callback errors and panics become [`WorkFailure`]s. They never
//!   abort the tick. Only bookkeeping violations
//!   ([`SchedulerError`]) do.
//! - Partitions are rebuilt on the ticking thread between ticks and are
//!   read-only while workers run.
//! - The [`Runtime`] decides per map whether the partition may be used
//!   ([`LifecycleState::Running`]) or the legacy plan applies.

pub mod error;
pub mod host;
pub mod lifecycle;
pub mod plan;
pub mod profiling;
pub mod runtime;
pub mod scheduler;
pub mod tracker;

pub use error::{PoolError, SchedulerError, WorkError};
pub use host::{MapEvent, MapNotifier, SimulationHost};
pub use lifecycle::{LifecycleState, MapLifecycle, ReoptimizationQueue};
pub use plan::{Phase, PhaseKind, PhaseWork, PlanShape, WorkPlan};
pub use profiling::TickProfile;
pub use runtime::{MapHandle, MapTickInfo, Runtime, TickReport};
pub use scheduler::{ScheduleReport, Scheduler, WorkFailure, WorkItem};
pub use tracker::{MapTracker, Progress};
