use parking_lot::{Mutex, MutexGuard};

use meridian_core::fixed::{Energy, Ticks};
use meridian_core::id::NetworkId;

use crate::config::SolverConfig;
use crate::network::{PowerNetwork, TickOutcome};
use crate::Environment;

/// All power networks of one map, each behind its own lock so that one
/// network can be handed to one worker while other networks of the same
/// map are solved elsewhere.
#[derive(Debug, Default)]
pub struct PowerGrid {
    networks: Vec<Mutex<PowerNetwork>>,
}

impl PowerGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_networks(networks: impl IntoIterator<Item = PowerNetwork>) -> Self {
        Self {
            networks: networks.into_iter().map(Mutex::new).collect(),
        }
    }

    /// Create `count` empty networks with ids `0..count`.
    pub fn with_networks(count: u32, config: &SolverConfig) -> Self {
        Self::from_networks((0..count).map(|i| PowerNetwork::new(NetworkId(i), config)))
    }

    /// Append a network; returns its index.
    pub fn push(&mut self, network: PowerNetwork) -> usize {
        self.networks.push(Mutex::new(network));
        self.networks.len() - 1
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// Lock one network. Blocks only if another worker is solving it.
    pub fn lock(&self, index: usize) -> Option<MutexGuard<'_, PowerNetwork>> {
        self.networks.get(index).map(Mutex::lock)
    }

    /// Direct access when the grid is not shared.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut PowerNetwork> {
        self.networks.get_mut(index).map(Mutex::get_mut)
    }

    /// Solve one network. `None` if `index` is out of range.
    pub fn solve(
        &self,
        index: usize,
        demand_sum: Energy,
        env: &Environment,
        tick: Ticks,
    ) -> Option<TickOutcome> {
        self.lock(index).map(|mut net| net.tick(demand_sum, env, tick))
    }

    /// `(consumer_ratio, generator_ratio)` from the last solve.
    pub fn ratios(&self, index: usize) -> Option<(f64, f64)> {
        self.lock(index)
            .map(|net| (net.consumer_ratio(), net.generator_ratio()))
    }

    pub fn into_networks(self) -> Vec<PowerNetwork> {
        self.networks.into_iter().map(Mutex::into_inner).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::Producer;
    use meridian_core::fixed::Fixed64;
    use meridian_core::id::MachineId;
    use std::sync::Arc;

    fn windy() -> Environment {
        Environment {
            wind_strength: Fixed64::ONE,
            ..Environment::default()
        }
    }

    #[test]
    fn solve_out_of_range_is_none() {
        let grid = PowerGrid::new();
        assert!(grid.solve(0, 10, &windy(), 0).is_none());
        assert!(grid.ratios(3).is_none());
    }

    #[test]
    fn networks_solve_independently() {
        let mut grid = PowerGrid::with_networks(2, &SolverConfig::default());
        grid.get_mut(0).unwrap().add_producer(Producer::wind(MachineId(0), 100));
        grid.get_mut(1).unwrap().add_producer(Producer::wind(MachineId(1), 10));

        grid.solve(0, 100, &windy(), 0).unwrap();
        grid.solve(1, 100, &windy(), 0).unwrap();

        assert_eq!(grid.ratios(0), Some((1.0, 1.0)));
        assert_eq!(grid.ratios(1), Some((0.1, 1.0)));
    }

    #[test]
    fn parallel_solves_on_distinct_networks() {
        let mut grid = PowerGrid::with_networks(8, &SolverConfig::default());
        for i in 0..8 {
            grid.get_mut(i).unwrap().add_producer(Producer::wind(MachineId(i as u32), 100));
        }
        let grid = Arc::new(grid);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let g = Arc::clone(&grid);
                std::thread::spawn(move || g.solve(i, 50, &windy(), 0).unwrap())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap().generator_ratio, 0.5);
        }
    }
}
