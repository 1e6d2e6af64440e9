//! The per-tick driver.
//!
//! [`Runtime::begin_tick`] runs the whole pipeline synchronously:
//!
//! 1. **Notifications** -- apply queued map additions and removals.
//! 2. **Lifecycle** -- poll each map's edit counter and observation flag.
//! 3. **Rebuild** -- re-partition at most `max_reoptimizations_per_tick`
//!    queued maps. Partitions are never touched after this point.
//! 4. **Plan** -- optimized plan for running maps, legacy plan otherwise.
//! 5. **Schedule** -- run every plan on the worker pool.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use rayon::{ThreadPool, ThreadPoolBuilder};
use slotmap::{DenseSlotMap, new_key_type};

use meridian_core::config::{ConfigError, SimConfig};
use meridian_core::fixed::Ticks;
use meridian_core::graph::{ConnectivityGraph, IntegrityIssue};
use meridian_core::id::HostMapId;
use meridian_core::partition::{Partition, Partitioner};

use crate::error::{PoolError, SchedulerError, WorkError};
use crate::host::{MapEvent, MapNotifier, SimulationHost, map_channel};
use crate::lifecycle::{LifecycleState, MapLifecycle, ReoptimizationQueue, Transition};
use crate::plan::{PhaseKind, PlanShape, WorkPlan};
use crate::profiling::TickProfile;
use crate::scheduler::{Scheduler, WorkFailure, WorkItem};

new_key_type! {
    /// Dense handle of a registered map.
    pub struct MapHandle;
}

// ---------------------------------------------------------------------------
// Map state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MapState {
    pub host_id: HostMapId,
    lifecycle: MapLifecycle,
    partition: Option<Partition>,
    /// Edit counter seen at the last poll.
    last_edit: u64,
}

impl MapState {
    fn new(host_id: HostMapId, now: Ticks) -> Self {
        Self {
            host_id,
            lifecycle: MapLifecycle::new(now),
            partition: None,
            last_edit: 0,
        }
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn partition(&self) -> Option<&Partition> {
        self.partition.as_ref()
    }

    /// A partition exists and reflects the current structure.
    pub fn partition_valid(&self) -> bool {
        self.partition
            .as_ref()
            .is_some_and(|p| p.built_for() == self.last_edit)
    }
}

// ---------------------------------------------------------------------------
// Tick report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapTickInfo {
    pub map: HostMapId,
    pub plan_shape: PlanShape,
    pub partition_valid: bool,
    /// SubUnits scheduled (0 for the legacy shape).
    pub sub_units: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: Ticks,
    pub failures: Vec<WorkFailure>,
    pub maps: Vec<MapTickInfo>,
    pub items_executed: usize,
    /// Maps re-partitioned this tick.
    pub rebuilt: Vec<HostMapId>,
    /// Data-integrity issues found by this tick's rebuilds.
    pub integrity_issues: Vec<(HostMapId, IntegrityIssue)>,
    pub profile: Option<TickProfile>,
}

impl TickReport {
    pub fn map(&self, map: HostMapId) -> Option<&MapTickInfo> {
        self.maps.iter().find(|m| m.map == map)
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

pub struct Runtime {
    config: SimConfig,
    partitioner: Partitioner,
    maps: DenseSlotMap<MapHandle, MapState>,
    by_host: HashMap<HostMapId, MapHandle>,
    notifier: MapNotifier,
    events: Receiver<MapEvent>,
    queue: ReoptimizationQueue<MapHandle>,
    tick: Ticks,
    pool: Option<ThreadPool>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("maps", &self.maps.len())
            .field("queued", &self.queue.len())
            .field("tick", &self.tick)
            .finish()
    }
}

impl Runtime {
    pub fn new(config: SimConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (notifier, events) = map_channel();
        Ok(Self {
            partitioner: Partitioner::new(config.min_work_per_unit),
            config,
            maps: DenseSlotMap::with_key(),
            by_host: HashMap::new(),
            notifier,
            events,
            queue: ReoptimizationQueue::new(),
            tick: 0,
            pool: None,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Index of the next tick to run.
    pub fn tick(&self) -> Ticks {
        self.tick
    }

    /// A handle for announcing maps from any thread.
    pub fn notifier(&self) -> MapNotifier {
        self.notifier.clone()
    }

    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    /// Register a map directly. Returns false if already registered.
    pub fn add_map(&mut self, map: HostMapId) -> bool {
        if self.by_host.contains_key(&map) {
            return false;
        }
        let handle = self.maps.insert(MapState::new(map, self.tick));
        self.by_host.insert(map, handle);
        tracing::debug!(%map, "map registered");
        true
    }

    /// Forget a map. Returns false if unknown.
    pub fn remove_map(&mut self, map: HostMapId) -> bool {
        let Some(handle) = self.by_host.remove(&map) else {
            return false;
        };
        self.maps.remove(handle);
        self.queue.remove(handle);
        tracing::debug!(%map, "map removed");
        true
    }

    pub fn map(&self, map: HostMapId) -> Option<&MapState> {
        self.by_host.get(&map).and_then(|&h| self.maps.get(h))
    }

    pub fn map_state(&self, map: HostMapId) -> Option<LifecycleState> {
        self.map(map).map(MapState::lifecycle)
    }

    pub fn partition(&self, map: HostMapId) -> Option<&Partition> {
        self.map(map).and_then(MapState::partition)
    }

    /// Queue a stopped map for re-partitioning without waiting out the
    /// cooldown. Returns whether it was queued.
    pub fn force_reoptimize(&mut self, map: HostMapId) -> bool {
        let Some(&handle) = self.by_host.get(&map) else {
            return false;
        };
        let Some(state) = self.maps.get_mut(handle) else {
            return false;
        };
        if state.lifecycle.force_queue() {
            self.queue.push(handle);
            true
        } else {
            false
        }
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Run one tick with the configured worker count.
    pub fn run_tick<H: SimulationHost>(&mut self, host: &H) -> Result<TickReport, SchedulerError> {
        self.begin_tick(host, self.config.worker_count)
    }

    /// Run one tick over every registered map with `worker_count` workers.
    pub fn begin_tick<H: SimulationHost>(
        &mut self,
        host: &H,
        worker_count: usize,
    ) -> Result<TickReport, SchedulerError> {
        let tick = self.tick;
        let span = tracing::info_span!("meridian.tick", tick);
        let _enter = span.enter();
        let started = Instant::now();

        // A pool failure leaves maps, queue and tick untouched.
        self.ensure_pool(worker_count)?;
        self.drain_notifications();
        self.poll_lifecycles(host, tick);
        let (rebuilt, integrity_issues) = self.rebuild_queued(host);
        let (plans, maps) = self.build_plans(host, worker_count);

        // Partitions by scheduler slot, for the SubUnits phase.
        let partitions: Vec<Option<&Partition>> = self
            .maps
            .values()
            .map(|state| state.partition.as_ref().filter(|_| state.lifecycle.is_running()))
            .collect();
        let Some(pool) = self.pool.as_ref() else {
            return Err(PoolError::ZeroWorkers.into());
        };

        let executor = |item: &WorkItem| -> Result<(), WorkError> {
            match item.phase {
                PhaseKind::Prepare => host.prepare(item.map, tick),
                PhaseKind::PowerSolve => host.solve_power_network(item.map, item.item, tick),
                PhaseKind::SubUnits => {
                    let unit = partitions
                        .get(item.slot)
                        .copied()
                        .flatten()
                        .and_then(|p| p.sub_units().get(item.item))
                        .ok_or_else(|| {
                            WorkError::host(format!("{} has no sub-unit {}", item.map, item.item))
                        })?;
                    host.simulate_sub_unit(item.map, unit, tick)
                }
                PhaseKind::LegacyChunks => {
                    host.simulate_legacy_chunk(item.map, item.item, item.phase_items, tick)
                }
                PhaseKind::Finalize => host.finalize(item.map, tick),
            }
        };

        let result = Scheduler::new(&plans)
            .with_wait_slice(Duration::from_micros(self.config.blocking_wait_micros))
            .run(executor, pool);
        self.tick += 1;
        let schedule = result?;

        let profile = schedule.profile.map(|mut p| {
            p.tick = tick;
            p.total = started.elapsed();
            p
        });
        tracing::debug!(
            maps = maps.len(),
            items = schedule.items_executed,
            failures = schedule.failures.len(),
            rebuilt = rebuilt.len(),
            "tick complete"
        );

        Ok(TickReport {
            tick,
            failures: schedule.failures,
            maps,
            items_executed: schedule.items_executed,
            rebuilt,
            integrity_issues,
            profile,
        })
    }

    fn drain_notifications(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                MapEvent::Added(map) => {
                    self.add_map(map);
                }
                MapEvent::Removed(map) => {
                    self.remove_map(map);
                }
            }
        }
    }

    fn poll_lifecycles<H: SimulationHost>(&mut self, host: &H, tick: Ticks) {
        let cooldown = self.config.reoptimization_cooldown_ticks;
        for (handle, state) in self.maps.iter_mut() {
            let edits = host.structural_edit_counter(state.host_id);
            let observed = host.is_observed(state.host_id);
            state.last_edit = edits;
            match state.lifecycle.poll(tick, edits, observed, cooldown) {
                Transition::Enqueue => {
                    tracing::debug!(map = %state.host_id, "queued for reoptimization");
                    self.queue.push(handle);
                }
                Transition::Dequeue => {
                    tracing::debug!(map = %state.host_id, "observed, left reoptimization queue");
                    self.queue.remove(handle);
                }
                Transition::Stopped | Transition::None => {}
            }
        }
    }

    fn rebuild_queued<H: SimulationHost>(
        &mut self,
        host: &H,
    ) -> (Vec<HostMapId>, Vec<(HostMapId, IntegrityIssue)>) {
        let mut rebuilt = Vec::new();
        let mut issues = Vec::new();
        for handle in self.queue.pop_batch(self.config.max_reoptimizations_per_tick) {
            let Some(state) = self.maps.get_mut(handle) else {
                continue;
            };
            let map = state.host_id;
            let edits = state.last_edit;

            if state.partition_valid() {
                tracing::debug!(%map, edits, "partition still valid, reusing");
            } else {
                let graph = ConnectivityGraph::build(&host.machines(map), &host.links(map));
                let partition = self.partitioner.partition(&graph, edits);
                tracing::debug!(
                    %map,
                    edits,
                    sub_units = partition.len(),
                    fingerprint = partition.fingerprint(),
                    "partition rebuilt"
                );
                issues.extend(partition.issues().iter().cloned().map(|issue| (map, issue)));
                state.partition = Some(partition);
                rebuilt.push(map);
            }
            state.lifecycle.start(edits);
        }
        (rebuilt, issues)
    }

    fn build_plans<H: SimulationHost>(
        &self,
        host: &H,
        worker_count: usize,
    ) -> (Vec<WorkPlan>, Vec<MapTickInfo>) {
        let mut plans = Vec::with_capacity(self.maps.len());
        let mut infos = Vec::with_capacity(self.maps.len());
        for state in self.maps.values() {
            let map = state.host_id;
            let networks = host.power_network_count(map);
            let partition_valid = state.partition_valid();
            let optimized = state
                .partition
                .as_ref()
                .filter(|_| partition_valid && state.lifecycle.is_running());

            let (plan, sub_units) = match optimized {
                Some(partition) => (
                    WorkPlan::optimized(map, networks, partition.len()),
                    partition.len(),
                ),
                None => (WorkPlan::legacy(map, networks, worker_count.max(1)), 0),
            };
            infos.push(MapTickInfo {
                map,
                plan_shape: plan.shape,
                partition_valid,
                sub_units,
            });
            plans.push(plan);
        }
        (plans, infos)
    }

    fn ensure_pool(&mut self, worker_count: usize) -> Result<(), PoolError> {
        if worker_count == 0 {
            return Err(PoolError::ZeroWorkers);
        }
        if self
            .pool
            .as_ref()
            .is_some_and(|p| p.current_num_threads() == worker_count)
        {
            return Ok(());
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|i| format!("meridian-worker-{i}"))
            .build()?;
        tracing::debug!(worker_count, "worker pool built");
        self.pool = Some(pool);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use meridian_core::graph::{Link, Machine};
    use meridian_core::partition::SubUnit;
    use meridian_core::test_utils::{MapFixture, island_map};
    use parking_lot::Mutex;

    struct OneMap {
        fixture: MapFixture,
        edits: AtomicU64,
        observed: AtomicBool,
        calls: Mutex<Vec<(PhaseKind, usize)>>,
    }

    impl OneMap {
        fn new(fixture: MapFixture) -> Self {
            Self {
                fixture,
                edits: AtomicU64::new(0),
                observed: AtomicBool::new(false),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn take_calls(&self) -> Vec<(PhaseKind, usize)> {
            std::mem::take(&mut *self.calls.lock())
        }
    }

    impl SimulationHost for OneMap {
        fn machines(&self, _map: HostMapId) -> Vec<Machine> {
            self.fixture.machines.clone()
        }

        fn links(&self, _map: HostMapId) -> Vec<Link> {
            self.fixture.links.clone()
        }

        fn structural_edit_counter(&self, _map: HostMapId) -> u64 {
            self.edits.load(Ordering::SeqCst)
        }

        fn is_observed(&self, _map: HostMapId) -> bool {
            self.observed.load(Ordering::SeqCst)
        }

        fn power_network_count(&self, _map: HostMapId) -> usize {
            1
        }

        fn solve_power_network(&self, _map: HostMapId, network: usize, _tick: Ticks) -> Result<(), WorkError> {
            self.calls.lock().push((PhaseKind::PowerSolve, network));
            Ok(())
        }

        fn simulate_sub_unit(&self, _map: HostMapId, unit: &SubUnit, _tick: Ticks) -> Result<(), WorkError> {
            self.calls.lock().push((PhaseKind::SubUnits, unit.id.0 as usize));
            Ok(())
        }

        fn simulate_legacy_chunk(
            &self,
            _map: HostMapId,
            chunk: usize,
            _chunk_count: usize,
            _tick: Ticks,
        ) -> Result<(), WorkError> {
            self.calls.lock().push((PhaseKind::LegacyChunks, chunk));
            Ok(())
        }
    }

    fn config() -> SimConfig {
        SimConfig {
            min_work_per_unit: 1,
            reoptimization_cooldown_ticks: 5,
            ..SimConfig::default()
        }
        .with_workers(2)
    }

    const MAP: HostMapId = HostMapId(1);

    #[test]
    fn invalid_config_is_rejected() {
        assert!(Runtime::new(SimConfig::default().with_workers(0)).is_err());
    }

    #[test]
    fn new_map_is_optimized_on_first_tick() {
        let mut rt = Runtime::new(config()).unwrap();
        let host = OneMap::new(island_map(&[2, 3, 1]));
        assert!(rt.add_map(MAP));
        assert!(!rt.add_map(MAP));

        let report = rt.begin_tick(&host, 2).unwrap();
        assert_eq!(report.tick, 0);
        assert_eq!(report.rebuilt, vec![MAP]);
        let info = report.map(MAP).unwrap();
        assert_eq!(info.plan_shape, PlanShape::Optimized);
        assert_eq!(info.sub_units, 3);
        assert!(info.partition_valid);
        assert_eq!(report.items_executed, 1 + 1 + 3 + 1);
        assert_eq!(rt.map_state(MAP), Some(LifecycleState::Running));
        assert_eq!(rt.tick(), 1);
    }

    #[test]
    fn edit_falls_back_to_legacy_until_cooldown() {
        let mut rt = Runtime::new(config()).unwrap();
        let host = OneMap::new(island_map(&[2, 2]));
        rt.add_map(MAP);
        rt.begin_tick(&host, 2).unwrap();

        host.edits.store(1, Ordering::SeqCst);
        let report = rt.begin_tick(&host, 2).unwrap();
        let info = report.map(MAP).unwrap();
        assert_eq!(info.plan_shape, PlanShape::Legacy);
        assert!(!info.partition_valid);
        assert_eq!(rt.map_state(MAP), Some(LifecycleState::Stopped { since: 1 }));
        host.take_calls();

        // Ticks 2..=5 still inside the cooldown.
        for _ in 2..6 {
            let report = rt.begin_tick(&host, 2).unwrap();
            assert_eq!(report.map(MAP).unwrap().plan_shape, PlanShape::Legacy);
        }
        let calls = host.take_calls();
        assert!(calls.iter().all(|(kind, _)| *kind != PhaseKind::SubUnits));

        let report = rt.begin_tick(&host, 2).unwrap();
        assert_eq!(report.tick, 6);
        assert_eq!(report.rebuilt, vec![MAP]);
        assert_eq!(report.map(MAP).unwrap().plan_shape, PlanShape::Optimized);
        assert_eq!(rt.partition(MAP).unwrap().built_for(), 1);
    }

    #[test]
    fn observed_map_stays_legacy() {
        let mut rt = Runtime::new(config()).unwrap();
        let host = OneMap::new(island_map(&[1, 1]));
        host.observed.store(true, Ordering::SeqCst);
        rt.add_map(MAP);
        for _ in 0..3 {
            let report = rt.begin_tick(&host, 1).unwrap();
            assert_eq!(report.map(MAP).unwrap().plan_shape, PlanShape::Legacy);
        }
        assert!(rt.partition(MAP).is_none());
    }

    #[test]
    fn force_reoptimize_skips_cooldown() {
        let mut rt = Runtime::new(config()).unwrap();
        let host = OneMap::new(island_map(&[3]));
        rt.add_map(MAP);
        rt.begin_tick(&host, 1).unwrap();
        host.edits.store(7, Ordering::SeqCst);
        rt.begin_tick(&host, 1).unwrap();

        assert!(rt.force_reoptimize(MAP));
        assert!(!rt.force_reoptimize(MAP));
        assert!(!rt.force_reoptimize(HostMapId(99)));
        let report = rt.begin_tick(&host, 1).unwrap();
        assert_eq!(report.map(MAP).unwrap().plan_shape, PlanShape::Optimized);
    }

    #[test]
    fn notifier_events_apply_at_next_tick() {
        let mut rt = Runtime::new(config()).unwrap();
        let host = OneMap::new(island_map(&[1]));
        let notifier = rt.notifier();
        notifier.added(MAP);
        assert_eq!(rt.map_count(), 0);
        rt.begin_tick(&host, 1).unwrap();
        assert_eq!(rt.map_count(), 1);

        notifier.removed(MAP);
        let report = rt.begin_tick(&host, 1).unwrap();
        assert_eq!(rt.map_count(), 0);
        assert!(report.maps.is_empty());
        assert_eq!(report.items_executed, 0);
    }

    #[test]
    fn zero_workers_is_an_error_and_changes_nothing() {
        let mut rt = Runtime::new(config()).unwrap();
        let host = OneMap::new(island_map(&[1]));
        rt.add_map(MAP);
        rt.notifier().added(HostMapId(9));
        assert!(matches!(
            rt.begin_tick(&host, 0),
            Err(SchedulerError::Pool(PoolError::ZeroWorkers))
        ));

        assert_eq!(rt.map_state(MAP), Some(LifecycleState::Stopped { since: 0 }));
        assert!(rt.partition(MAP).is_none());
        assert_eq!(rt.map_count(), 1, "notifications stay pending");
        assert_eq!(rt.tick(), 0);
        assert!(host.take_calls().is_empty());

        rt.begin_tick(&host, 1).unwrap();
        assert_eq!(rt.map_count(), 2);
        assert_eq!(rt.tick(), 1);
    }

    #[test]
    fn rebuilds_are_rate_limited() {
        let mut rt = Runtime::new(config()).unwrap();
        let host = OneMap::new(island_map(&[1]));
        for id in 0..3 {
            rt.add_map(HostMapId(id));
        }
        let first = rt.begin_tick(&host, 2).unwrap();
        assert_eq!(first.rebuilt.len(), 1);
        let second = rt.begin_tick(&host, 2).unwrap();
        assert_eq!(second.rebuilt.len(), 1);
        let shapes: Vec<_> = second.maps.iter().map(|m| m.plan_shape).collect();
        assert_eq!(
            shapes.iter().filter(|s| **s == PlanShape::Optimized).count(),
            2
        );
    }
}
