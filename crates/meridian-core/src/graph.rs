//! Undirected connectivity graph over one map's machines.
//!
//! Links are directed in the host (an output feeding an input) but two
//! linked machines share transport state no matter which way items flow, so
//! for partitioning every link is an undirected edge. Adjacency is stored in
//! compressed sparse row form: one `offsets` array indexed by dense machine
//! index, one flat `neighbors` array.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::id::{MachineId, NetworkId, SubUnitId};

// ---------------------------------------------------------------------------
// Input records
// ---------------------------------------------------------------------------

/// A machine as the partitioner sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: MachineId,
    /// Electrical network this machine is wired into.
    pub network: NetworkId,
    /// Estimated per-tick work, in arbitrary cost units.
    pub cost: u32,
}

/// A material or signal flow between two machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub from: MachineId,
    pub to: MachineId,
}

impl Link {
    pub fn new(from: MachineId, to: MachineId) -> Self {
        Self { from, to }
    }
}

// ---------------------------------------------------------------------------
// Integrity issues
// ---------------------------------------------------------------------------

/// Data-integrity problems found while building a graph or partition.
///
/// These are recovered locally (the offending edge or duplicate is dropped)
/// and surfaced to the host as diagnostics; they never abort a rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum IntegrityIssue {
    #[error("link {from:?} -> {to:?} references unknown machine {missing:?}")]
    DanglingLink {
        from: MachineId,
        to: MachineId,
        missing: MachineId,
    },
    #[error("machine {0:?} listed more than once")]
    DuplicateMachine(MachineId),
    #[error("machine {machine:?} claimed by sub-units {first:?} and {second:?}")]
    DuplicateAssignment {
        machine: MachineId,
        first: SubUnitId,
        second: SubUnitId,
    },
    #[error("machine {0:?} not assigned to any sub-unit")]
    UnassignedMachine(MachineId),
}

// ---------------------------------------------------------------------------
// ConnectivityGraph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ConnectivityGraph {
    /// Machines in input order, duplicates removed.
    machines: Vec<Machine>,
    /// Machine id -> dense index into `machines`.
    index: HashMap<MachineId, u32>,
    /// CSR row offsets, `machines.len() + 1` entries.
    offsets: Vec<u32>,
    /// CSR column indices (dense machine indices).
    neighbors: Vec<u32>,
    /// Number of undirected edges kept.
    edge_count: usize,
    issues: Vec<IntegrityIssue>,
}

impl ConnectivityGraph {
    /// Build the graph from the host's machine and link enumeration.
    pub fn build(machines: &[Machine], links: &[Link]) -> Self {
        let mut issues = Vec::new();
        let mut kept = Vec::with_capacity(machines.len());
        let mut index = HashMap::with_capacity(machines.len());

        for machine in machines {
            if index.contains_key(&machine.id) {
                tracing::warn!(machine = ?machine.id, "duplicate machine in enumeration, dropping");
                issues.push(IntegrityIssue::DuplicateMachine(machine.id));
                continue;
            }
            index.insert(machine.id, kept.len() as u32);
            kept.push(*machine);
        }

        // Resolve endpoints first so the CSR pass works on dense indices only.
        let mut edges: Vec<(u32, u32)> = Vec::with_capacity(links.len());
        for link in links {
            let from = index.get(&link.from).copied();
            let to = index.get(&link.to).copied();
            match (from, to) {
                (Some(a), Some(b)) => {
                    if a != b {
                        edges.push((a, b));
                    }
                }
                (None, _) => {
                    tracing::warn!(from = ?link.from, to = ?link.to, "dangling link source, skipping");
                    issues.push(IntegrityIssue::DanglingLink {
                        from: link.from,
                        to: link.to,
                        missing: link.from,
                    });
                }
                (Some(_), None) => {
                    tracing::warn!(from = ?link.from, to = ?link.to, "dangling link target, skipping");
                    issues.push(IntegrityIssue::DanglingLink {
                        from: link.from,
                        to: link.to,
                        missing: link.to,
                    });
                }
            }
        }

        let n = kept.len();
        let mut degree = vec![0u32; n + 1];
        for &(a, b) in &edges {
            degree[a as usize] += 1;
            degree[b as usize] += 1;
        }

        let mut offsets = Vec::with_capacity(n + 1);
        let mut running = 0u32;
        for d in degree.iter().take(n) {
            offsets.push(running);
            running += d;
        }
        offsets.push(running);

        let mut cursor: Vec<u32> = offsets[..n].to_vec();
        let mut neighbors = vec![0u32; running as usize];
        for &(a, b) in &edges {
            neighbors[cursor[a as usize] as usize] = b;
            cursor[a as usize] += 1;
            neighbors[cursor[b as usize] as usize] = a;
            cursor[b as usize] += 1;
        }

        Self {
            machines: kept,
            index,
            offsets,
            neighbors,
            edge_count: edges.len(),
            issues,
        }
    }

    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Machines in dense-index order (input order, duplicates removed).
    pub fn machines(&self) -> &[Machine] {
        &self.machines
    }

    pub fn machine(&self, index: u32) -> &Machine {
        &self.machines[index as usize]
    }

    /// Dense index of a machine id, if present.
    pub fn index_of(&self, id: MachineId) -> Option<u32> {
        self.index.get(&id).copied()
    }

    /// Dense indices adjacent to `index`.
    pub fn neighbors(&self, index: u32) -> &[u32] {
        let start = self.offsets[index as usize] as usize;
        let end = self.offsets[index as usize + 1] as usize;
        &self.neighbors[start..end]
    }

    /// Sum of all machine costs.
    pub fn total_cost(&self) -> u64 {
        self.machines.iter().map(|m| m.cost as u64).sum()
    }

    /// Integrity issues found while building.
    pub fn issues(&self) -> &[IntegrityIssue] {
        &self.issues
    }
}
