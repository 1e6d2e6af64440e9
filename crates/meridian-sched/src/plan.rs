//! Per-map work plans.
//!
//! A plan is an ordered list of phases. Phases of one map run strictly in
//! order; the items inside a phase are independent; maps are independent of
//! each other.

use meridian_core::id::HostMapId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhaseKind {
    /// Host bookkeeping before anything is simulated.
    Prepare,
    /// One item per power network.
    PowerSolve,
    /// One item per SubUnit of a valid partition.
    SubUnits,
    /// Whole-map fallback, split into fixed chunks.
    LegacyChunks,
    /// Host bookkeeping after everything is simulated.
    Finalize,
}

impl PhaseKind {
    pub const ALL: [PhaseKind; 5] = [
        PhaseKind::Prepare,
        PhaseKind::PowerSolve,
        PhaseKind::SubUnits,
        PhaseKind::LegacyChunks,
        PhaseKind::Finalize,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            PhaseKind::Prepare => "prepare",
            PhaseKind::PowerSolve => "power_solve",
            PhaseKind::SubUnits => "sub_units",
            PhaseKind::LegacyChunks => "legacy_chunks",
            PhaseKind::Finalize => "finalize",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseWork {
    /// A single indivisible action.
    Leaf,
    /// `n` independently schedulable items.
    Items(usize),
}

impl PhaseWork {
    pub fn item_count(self) -> usize {
        match self {
            PhaseWork::Leaf => 1,
            PhaseWork::Items(n) => n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub kind: PhaseKind,
    pub work: PhaseWork,
}

impl Phase {
    pub fn leaf(kind: PhaseKind) -> Self {
        Self {
            kind,
            work: PhaseWork::Leaf,
        }
    }

    pub fn items(kind: PhaseKind, n: usize) -> Self {
        Self {
            kind,
            work: PhaseWork::Items(n),
        }
    }
}

/// Which of the two standard plan shapes a map got this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanShape {
    Optimized,
    Legacy,
    /// Hand-built plan.
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkPlan {
    pub map: HostMapId,
    pub shape: PlanShape,
    pub phases: Vec<Phase>,
}

impl WorkPlan {
    pub fn new(map: HostMapId, phases: Vec<Phase>) -> Self {
        Self {
            map,
            shape: PlanShape::Custom,
            phases,
        }
    }

    /// Prepare, one item per power network, one item per SubUnit, Finalize.
    pub fn optimized(map: HostMapId, power_networks: usize, sub_units: usize) -> Self {
        Self {
            map,
            shape: PlanShape::Optimized,
            phases: vec![
                Phase::leaf(PhaseKind::Prepare),
                Phase::items(PhaseKind::PowerSolve, power_networks),
                Phase::items(PhaseKind::SubUnits, sub_units),
                Phase::leaf(PhaseKind::Finalize),
            ],
        }
    }

    /// Same as [`WorkPlan::optimized`] but the map body is split into
    /// `chunks` whole-map slices instead of SubUnits.
    pub fn legacy(map: HostMapId, power_networks: usize, chunks: usize) -> Self {
        Self {
            map,
            shape: PlanShape::Legacy,
            phases: vec![
                Phase::leaf(PhaseKind::Prepare),
                Phase::items(PhaseKind::PowerSolve, power_networks),
                Phase::items(PhaseKind::LegacyChunks, chunks),
                Phase::leaf(PhaseKind::Finalize),
            ],
        }
    }

    pub fn item_count(&self) -> usize {
        self.phases.iter().map(|p| p.work.item_count()).sum()
    }
}
