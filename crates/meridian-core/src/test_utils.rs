//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::fixed::Fixed64;
use crate::graph::{Link, Machine};
use crate::id::{MachineId, NetworkId};

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

// ===========================================================================
// Map fixtures
// ===========================================================================

/// A machine/link enumeration as a host would hand it over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapFixture {
    pub machines: Vec<Machine>,
    pub links: Vec<Link>,
}

impl MapFixture {
    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    /// Reassign every machine's network with `f(machine_index)`.
    pub fn with_networks(mut self, f: impl Fn(usize) -> u32) -> Self {
        for (i, machine) in self.machines.iter_mut().enumerate() {
            machine.network = NetworkId(f(i));
        }
        self
    }

    /// Set every machine's cost.
    pub fn with_cost(mut self, cost: u32) -> Self {
        for machine in &mut self.machines {
            machine.cost = cost;
        }
        self
    }
}

pub fn machine(id: u32, network: u32, cost: u32) -> Machine {
    Machine {
        id: MachineId(id),
        network: NetworkId(network),
        cost,
    }
}

pub fn link(from: u32, to: u32) -> Link {
    Link::new(MachineId(from), MachineId(to))
}

/// Islands of chained machines, one per entry in `sizes`. Ids are
/// contiguous from 0; every machine has cost 1 and network 0.
pub fn island_map(sizes: &[u32]) -> MapFixture {
    let mut fixture = MapFixture::default();
    let mut next = 0u32;
    for &size in sizes {
        for offset in 0..size {
            fixture.machines.push(machine(next + offset, 0, 1));
            if offset > 0 {
                fixture.links.push(link(next + offset - 1, next + offset));
            }
        }
        next += size;
    }
    fixture
}

/// One chain of `len` machines.
pub fn chain_map(len: u32) -> MapFixture {
    island_map(&[len])
}

/// A `width` x `height` grid, each cell linked to its right and lower
/// neighbor. Row-major ids.
pub fn grid_map(width: u32, height: u32) -> MapFixture {
    let mut fixture = MapFixture::default();
    for y in 0..height {
        for x in 0..width {
            let id = y * width + x;
            fixture.machines.push(machine(id, 0, 1));
            if x + 1 < width {
                fixture.links.push(link(id, id + 1));
            }
            if y + 1 < height {
                fixture.links.push(link(id, id + width));
            }
        }
    }
    fixture
}

/// `count` unlinked machines spread round-robin over `networks` networks.
pub fn scattered_map(count: u32, networks: u32) -> MapFixture {
    let networks = networks.max(1);
    MapFixture {
        machines: (0..count).map(|i| machine(i, i % networks, 1)).collect(),
        links: Vec::new(),
    }
}
