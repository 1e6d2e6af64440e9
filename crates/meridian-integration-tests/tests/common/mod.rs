//! A headless host: maps with machines, links, power grids and shared
//! statistics, simulated through the runtime's callbacks.
//!
//! Every callback checks the ordering guarantees it relies on and reports
//! a violation as a work failure, so a test only has to assert that a tick
//! produced no failures.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use meridian_core::dirty::EditCounter;
use meridian_core::fixed::{Energy, Ticks};
use meridian_core::graph::{Link, Machine};
use meridian_core::id::{HostMapId, MachineId};
use meridian_core::partition::SubUnit;
use meridian_core::stats::StatRegister;
use meridian_core::test_utils::MapFixture;
use meridian_power::{Environment, PowerEvent, PowerGrid, TickOutcome};
use meridian_sched::{SimulationHost, WorkError};
use parking_lot::Mutex;

/// Machines simulated.
pub const STAT_MACHINES: usize = 0;
/// Machine cost simulated.
pub const STAT_COST: usize = 1;
/// Power events emitted.
pub const STAT_POWER_EVENTS: usize = 2;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct HostMap {
    pub machines: Vec<Machine>,
    pub links: Vec<Link>,
    pub edits: EditCounter,
    pub observed: AtomicBool,
    pub grid: PowerGrid,
    /// Consumer demand per power network.
    pub demand: Vec<Energy>,
    pub env: Environment,
    pub stats: StatRegister,
    solved: AtomicUsize,
    simulated: Mutex<Vec<MachineId>>,
    /// Outcomes of the last tick's power phase, by network index.
    pub outcomes: Mutex<BTreeMap<usize, TickOutcome>>,
    pub events: Mutex<Vec<PowerEvent>>,
}

impl HostMap {
    pub fn new(fixture: MapFixture, grid: PowerGrid) -> Self {
        let demand = vec![0; grid.len()];
        Self {
            machines: fixture.machines,
            links: fixture.links,
            edits: EditCounter::new(),
            observed: AtomicBool::new(false),
            grid,
            demand,
            env: Environment::default(),
            stats: StatRegister::new(3, 16),
            solved: AtomicUsize::new(0),
            simulated: Mutex::new(Vec::new()),
            outcomes: Mutex::new(BTreeMap::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Add a machine linked to `linked_to`, as a player placing it would.
    pub fn place(&mut self, machine: Machine, linked_to: Option<MachineId>) {
        self.machines.push(machine);
        if let Some(other) = linked_to {
            self.links.push(Link::new(other, machine.id));
        }
        self.edits.mark_dirty();
    }

    pub fn set_observed(&self, observed: bool) {
        self.observed.store(observed, Ordering::SeqCst);
    }

    pub fn outcome(&self, network: usize) -> Option<TickOutcome> {
        self.outcomes.lock().get(&network).cloned()
    }

    fn simulate(&self, machines: impl Iterator<Item = MachineId>) -> Result<(), WorkError> {
        let solved = self.solved.load(Ordering::SeqCst);
        if solved != self.grid.len() {
            return Err(WorkError::host(format!(
                "machines simulated after {solved} of {} networks",
                self.grid.len()
            )));
        }
        let mut count = 0;
        let mut simulated = self.simulated.lock();
        for id in machines {
            simulated.push(id);
            count += 1;
        }
        self.stats.add(STAT_MACHINES, count);
        Ok(())
    }
}

#[derive(Default)]
pub struct FactoryHost {
    maps: BTreeMap<HostMapId, HostMap>,
}

impl FactoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: HostMapId, map: HostMap) {
        self.maps.insert(id, map);
    }

    pub fn remove(&mut self, id: HostMapId) -> Option<HostMap> {
        self.maps.remove(&id)
    }

    pub fn map(&self, id: HostMapId) -> &HostMap {
        &self.maps[&id]
    }

    pub fn map_mut(&mut self, id: HostMapId) -> &mut HostMap {
        self.maps.get_mut(&id).unwrap()
    }

    /// Roll every map's statistics into history. Between ticks only.
    pub fn commit_stats(&mut self) {
        for map in self.maps.values_mut() {
            map.stats.commit();
        }
    }

    fn get(&self, id: HostMapId) -> Result<&HostMap, WorkError> {
        self.maps
            .get(&id)
            .ok_or_else(|| WorkError::host(format!("unknown {id}")))
    }
}

impl SimulationHost for FactoryHost {
    fn machines(&self, map: HostMapId) -> Vec<Machine> {
        self.maps.get(&map).map(|m| m.machines.clone()).unwrap_or_default()
    }

    fn links(&self, map: HostMapId) -> Vec<Link> {
        self.maps.get(&map).map(|m| m.links.clone()).unwrap_or_default()
    }

    fn structural_edit_counter(&self, map: HostMapId) -> u64 {
        self.maps.get(&map).map_or(0, |m| m.edits.current())
    }

    fn is_observed(&self, map: HostMapId) -> bool {
        self.maps
            .get(&map)
            .is_some_and(|m| m.observed.load(Ordering::SeqCst))
    }

    fn power_network_count(&self, map: HostMapId) -> usize {
        self.maps.get(&map).map_or(0, |m| m.grid.len())
    }

    fn prepare(&self, map: HostMapId, _tick: Ticks) -> Result<(), WorkError> {
        let map = self.get(map)?;
        map.solved.store(0, Ordering::SeqCst);
        map.simulated.lock().clear();
        map.outcomes.lock().clear();
        Ok(())
    }

    fn solve_power_network(&self, map: HostMapId, network: usize, tick: Ticks) -> Result<(), WorkError> {
        let map = self.get(map)?;
        let demand = map.demand.get(network).copied().unwrap_or(0);
        let outcome = map
            .grid
            .solve(network, demand, &map.env, tick)
            .ok_or_else(|| WorkError::host(format!("no network {network}")))?;
        map.stats.add(STAT_POWER_EVENTS, outcome.events.len() as i64);
        map.events.lock().extend(outcome.events.iter().cloned());
        map.outcomes.lock().insert(network, outcome);
        map.solved.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn simulate_sub_unit(&self, map: HostMapId, unit: &SubUnit, _tick: Ticks) -> Result<(), WorkError> {
        let map = self.get(map)?;
        map.simulate(unit.machines.iter().copied())?;
        map.stats.add(STAT_COST, unit.cost as i64);
        Ok(())
    }

    fn simulate_legacy_chunk(
        &self,
        map: HostMapId,
        chunk: usize,
        chunk_count: usize,
        _tick: Ticks,
    ) -> Result<(), WorkError> {
        let map = self.get(map)?;
        let slice: Vec<&Machine> = map
            .machines
            .iter()
            .enumerate()
            .filter(|(i, _)| i % chunk_count == chunk)
            .map(|(_, m)| m)
            .collect();
        map.simulate(slice.iter().map(|m| m.id))?;
        map.stats
            .add(STAT_COST, slice.iter().map(|m| m.cost as i64).sum());
        Ok(())
    }

    fn finalize(&self, map: HostMapId, _tick: Ticks) -> Result<(), WorkError> {
        let map = self.get(map)?;
        let simulated = map.simulated.lock();
        let unique: HashSet<MachineId> = simulated.iter().copied().collect();
        if simulated.len() != map.machines.len() || unique.len() != simulated.len() {
            return Err(WorkError::host(format!(
                "simulated {} machine slots ({} unique) of {}",
                simulated.len(),
                unique.len(),
                map.machines.len()
            )));
        }
        Ok(())
    }
}
