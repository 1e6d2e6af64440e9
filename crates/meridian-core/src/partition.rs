//! Splits one map's connectivity graph into independently simulatable
//! SubUnits.
//!
//! Two machines joined by any chain of links must land in the same SubUnit,
//! otherwise two workers could race on the transport state between them.
//! Components are found with union-find, then undersized components are
//! merged smallest-first so the scheduler is not flooded with trivial items.
//!
//! # Merge order
//!
//! The smallest undersized group (by cost, then by component id) is merged
//! with the smallest undersized group sharing a power network with it, or,
//! failing that, with the smallest other undersized group. Groups stop
//! growing once they reach `min_work_per_unit`. Output is fully determined
//! by the input order of machines and links.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::graph::{ConnectivityGraph, IntegrityIssue};
use crate::hash::StateHash;
use crate::id::{MachineId, NetworkId, SubUnitId};

// ---------------------------------------------------------------------------
// SubUnit / Partition
// ---------------------------------------------------------------------------

/// A connected (or merged) group of machines simulated as one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubUnit {
    pub id: SubUnitId,
    /// Member machines, in the host's enumeration order.
    pub machines: Vec<MachineId>,
    /// Sum of member costs.
    pub cost: u64,
}

impl SubUnit {
    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}

/// The partition of one map, tagged with the structural edit counter it was
/// built against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    sub_units: Vec<SubUnit>,
    built_for: u64,
    min_work_per_unit: u64,
    issues: Vec<IntegrityIssue>,
}

/// Result of checking a partition against its graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionCheck {
    /// Machines in the graph that no SubUnit claims.
    pub missing: Vec<MachineId>,
    /// Machines claimed by more than one SubUnit, with the two claimants.
    pub duplicated: Vec<(MachineId, SubUnitId, SubUnitId)>,
    /// Machines claimed that the graph does not contain.
    pub unknown: Vec<MachineId>,
}

impl PartitionCheck {
    pub fn is_valid(&self) -> bool {
        self.missing.is_empty() && self.duplicated.is_empty() && self.unknown.is_empty()
    }
}

impl Partition {
    pub fn sub_units(&self) -> &[SubUnit] {
        &self.sub_units
    }

    pub fn sub_unit(&self, id: SubUnitId) -> Option<&SubUnit> {
        self.sub_units.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.sub_units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sub_units.is_empty()
    }

    /// The structural edit counter value this partition reflects.
    pub fn built_for(&self) -> u64 {
        self.built_for
    }

    pub fn min_work_per_unit(&self) -> u64 {
        self.min_work_per_unit
    }

    /// Integrity issues found while building the graph and partition.
    pub fn issues(&self) -> &[IntegrityIssue] {
        &self.issues
    }

    pub fn total_cost(&self) -> u64 {
        self.sub_units.iter().map(|s| s.cost).sum()
    }

    pub fn machine_count(&self) -> usize {
        self.sub_units.iter().map(|s| s.machines.len()).sum()
    }

    /// Machine -> owning SubUnit lookup.
    pub fn assignment(&self) -> HashMap<MachineId, SubUnitId> {
        let mut map = HashMap::with_capacity(self.machine_count());
        for unit in &self.sub_units {
            for &machine in &unit.machines {
                map.entry(machine).or_insert(unit.id);
            }
        }
        map
    }

    /// Fingerprint of the SubUnit -> machine assignment.
    pub fn fingerprint(&self) -> u64 {
        let mut hash = StateHash::new();
        hash.write_u64(self.sub_units.len() as u64);
        for unit in &self.sub_units {
            hash.write_u32(unit.id.0);
            hash.write_u64(unit.cost);
            hash.write_u64(unit.machines.len() as u64);
            for machine in &unit.machines {
                hash.write_u32(machine.0);
            }
        }
        hash.finish()
    }

    /// Check completeness and exclusivity against `graph`.
    pub fn check(&self, graph: &ConnectivityGraph) -> PartitionCheck {
        let mut check = PartitionCheck::default();
        let mut owner: Vec<Option<SubUnitId>> = vec![None; graph.machine_count()];

        for unit in &self.sub_units {
            for &machine in &unit.machines {
                match graph.index_of(machine) {
                    Some(idx) => match owner[idx as usize] {
                        Some(first) => check.duplicated.push((machine, first, unit.id)),
                        None => owner[idx as usize] = Some(unit.id),
                    },
                    None => check.unknown.push(machine),
                }
            }
        }

        for (idx, slot) in owner.iter().enumerate() {
            if slot.is_none() {
                check.missing.push(graph.machine(idx as u32).id);
            }
        }
        check
    }

    /// Check the partition against a fresh machine enumeration and repair it
    /// in place. A machine claimed twice stays with its first SubUnit.
    pub fn validate(&mut self, machines: &[crate::graph::Machine]) -> Vec<IntegrityIssue> {
        let graph = ConnectivityGraph::build(machines, &[]);
        self.repair(&graph)
    }

    /// Restore the exactly-once invariant: drop duplicate and unknown claims
    /// (keeping the first claimant) and give every unclaimed machine its own
    /// SubUnit. Returns the issues repaired.
    pub fn repair(&mut self, graph: &ConnectivityGraph) -> Vec<IntegrityIssue> {
        let check = self.check(graph);
        if check.is_valid() {
            return Vec::new();
        }

        let mut issues = Vec::new();
        let mut claimed = vec![false; graph.machine_count()];
        for unit in &mut self.sub_units {
            let mut kept = Vec::with_capacity(unit.machines.len());
            let mut cost = 0u64;
            for &machine in &unit.machines {
                let Some(idx) = graph.index_of(machine) else {
                    continue;
                };
                if claimed[idx as usize] {
                    continue;
                }
                claimed[idx as usize] = true;
                cost += graph.machine(idx).cost as u64;
                kept.push(machine);
            }
            unit.machines = kept;
            unit.cost = cost;
        }

        for (machine, first, second) in check.duplicated {
            tracing::warn!(?machine, ?first, ?second, "machine claimed twice, keeping first claimant");
            issues.push(IntegrityIssue::DuplicateAssignment {
                machine,
                first,
                second,
            });
        }
        for machine in check.missing {
            tracing::warn!(?machine, "machine missing from partition, adding singleton");
            let idx = graph.index_of(machine).unwrap_or_default();
            self.sub_units.push(SubUnit {
                id: SubUnitId(0),
                machines: vec![machine],
                cost: graph.machine(idx).cost as u64,
            });
            issues.push(IntegrityIssue::UnassignedMachine(machine));
        }

        self.sub_units.retain(|unit| !unit.machines.is_empty());
        for (i, unit) in self.sub_units.iter_mut().enumerate() {
            unit.id = SubUnitId(i as u32);
        }
        self.issues.extend(issues.iter().cloned());
        issues
    }
}

// ---------------------------------------------------------------------------
// Union-find
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct UnionFind {
    parent: Vec<u32>,
    size: Vec<u32>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n as u32).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    fn union(&mut self, a: u32, b: u32) {
        let mut ra = self.find(a);
        let mut rb = self.find(b);
        if ra == rb {
            return;
        }
        if self.size[ra as usize] < self.size[rb as usize] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb as usize] = ra;
        self.size[ra as usize] += self.size[rb as usize];
    }
}

// ---------------------------------------------------------------------------
// Partitioner
// ---------------------------------------------------------------------------

/// Working state for one component or merged group.
#[derive(Debug, Clone)]
struct Group {
    /// Dense machine indices.
    members: Vec<u32>,
    cost: u64,
    networks: BTreeSet<NetworkId>,
    alive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partitioner {
    min_work_per_unit: u64,
}

impl Partitioner {
    pub fn new(min_work_per_unit: u64) -> Self {
        Self { min_work_per_unit }
    }

    pub fn min_work_per_unit(&self) -> u64 {
        self.min_work_per_unit
    }

    /// Find the connected components of `graph`, ordered by first machine.
    pub fn components(&self, graph: &ConnectivityGraph) -> Vec<Vec<u32>> {
        let n = graph.machine_count();
        let mut uf = UnionFind::new(n);
        for a in 0..n as u32 {
            for &b in graph.neighbors(a) {
                if a < b {
                    uf.union(a, b);
                }
            }
        }

        let mut component_of_root: HashMap<u32, usize> = HashMap::new();
        let mut components: Vec<Vec<u32>> = Vec::new();
        for idx in 0..n as u32 {
            let root = uf.find(idx);
            let slot = *component_of_root.entry(root).or_insert_with(|| {
                components.push(Vec::new());
                components.len() - 1
            });
            components[slot].push(idx);
        }
        components
    }

    /// Partition a graph, tagging the result with `edit_counter`.
    pub fn partition(&self, graph: &ConnectivityGraph, edit_counter: u64) -> Partition {
        let components = self.components(graph);
        let mut groups: Vec<Group> = components
            .into_iter()
            .map(|members| {
                let cost = members.iter().map(|&i| graph.machine(i).cost as u64).sum();
                let networks = members.iter().map(|&i| graph.machine(i).network).collect();
                Group {
                    members,
                    cost,
                    networks,
                    alive: true,
                }
            })
            .collect();

        if self.min_work_per_unit > 0 {
            self.merge_undersized(&mut groups);
        }

        let mut alive: Vec<Group> = groups.into_iter().filter(|g| g.alive).collect();
        for group in &mut alive {
            group.members.sort_unstable();
        }
        alive.sort_by_key(|g| g.members.first().copied().unwrap_or(u32::MAX));

        let sub_units = alive
            .into_iter()
            .enumerate()
            .map(|(i, group)| SubUnit {
                id: SubUnitId(i as u32),
                machines: group
                    .members
                    .iter()
                    .map(|&idx| graph.machine(idx).id)
                    .collect(),
                cost: group.cost,
            })
            .collect();

        let mut partition = Partition {
            sub_units,
            built_for: edit_counter,
            min_work_per_unit: self.min_work_per_unit,
            issues: graph.issues().to_vec(),
        };
        partition.repair(graph);

        tracing::debug!(
            machines = graph.machine_count(),
            links = graph.edge_count(),
            sub_units = partition.len(),
            fingerprint = partition.fingerprint(),
            "partition built"
        );
        partition
    }

    fn merge_undersized(&self, groups: &mut [Group]) {
        let min = self.min_work_per_unit;

        // Ordered by (cost, group index); the index is the component id.
        let mut small: BTreeSet<(u64, usize)> = BTreeSet::new();
        let mut by_network: HashMap<NetworkId, BTreeSet<(u64, usize)>> = HashMap::new();

        for (idx, group) in groups.iter().enumerate() {
            if group.cost < min {
                small.insert((group.cost, idx));
                for &net in &group.networks {
                    by_network.entry(net).or_default().insert((group.cost, idx));
                }
            }
        }

        while let Some((seed_cost, seed)) = small.first().copied() {
            remove_small(&mut small, &mut by_network, &groups[seed], seed_cost, seed);

            let neighbor = groups[seed]
                .networks
                .iter()
                .filter_map(|net| by_network.get(net).and_then(|set| set.first()))
                .min()
                .copied();
            let Some((partner_cost, partner)) = neighbor.or_else(|| small.first().copied())
            else {
                // The seed is the only undersized group left.
                break;
            };
            remove_small(&mut small, &mut by_network, &groups[partner], partner_cost, partner);

            let absorbed = std::mem::take(&mut groups[partner].members);
            let absorbed_networks = std::mem::take(&mut groups[partner].networks);
            groups[partner].alive = false;

            let merged = &mut groups[seed];
            merged.members.extend(absorbed);
            merged.cost += partner_cost;
            merged.networks.extend(absorbed_networks);

            if merged.cost < min {
                small.insert((merged.cost, seed));
                for &net in &merged.networks {
                    by_network.entry(net).or_default().insert((merged.cost, seed));
                }
            }
        }
    }
}

fn remove_small(
    small: &mut BTreeSet<(u64, usize)>,
    by_network: &mut HashMap<NetworkId, BTreeSet<(u64, usize)>>,
    group: &Group,
    cost: u64,
    idx: usize,
) {
    small.remove(&(cost, idx));
    for net in &group.networks {
        if let Some(set) = by_network.get_mut(net) {
            set.remove(&(cost, idx));
        }
    }
}

/// Build the graph and partition it in one call.
pub fn partition_map(
    machines: &[crate::graph::Machine],
    links: &[crate::graph::Link],
    min_work_per_unit: u64,
    edit_counter: u64,
) -> Partition {
    let graph = ConnectivityGraph::build(machines, links);
    Partitioner::new(min_work_per_unit).partition(&graph, edit_counter)
}
