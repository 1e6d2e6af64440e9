//! Power solver for the Meridian runtime.
//!
//! Balances every electrical network once per tick: sums heterogeneous
//! producer capacities, routes surplus into accumulators, charging
//! exchangers and an optional export sink, draws shortfalls from
//! accumulators, and writes back two realized ratios that consumers read on
//! the next tick.
//!
//! # Design
//!
//! - Energies are integer joules per tick; all scaling factors are
//!   [`Fixed64`](meridian_core::fixed::Fixed64). Ratios are `f64` and only
//!   used for display and throttling.
//! - A network with no producers and no demand is idle and reports both
//!   ratios as 1.0. A network that has producers but no demand and no
//!   storage flow reports both ratios as 0.0.
//! - The generator ratio is `demand / (production - charged)`, clamped to
//!   `[0, 1]`. Exported energy never raises it.
//! - Producer state (warm-ups, fuel, exchanger cells) advances exactly once
//!   per [`PowerNetwork::tick`].
//! - Brownout/restored events fire only on *transitions*.

pub mod config;
pub mod grid;
pub mod network;
pub mod producer;
pub mod storage;

pub use config::SolverConfig;
pub use grid::PowerGrid;
pub use network::{PowerEvent, PowerNetwork, SolarCachePolicy, TickOutcome};
pub use producer::{
    Direction, Exchanger, ExchangerDirection, ExchangerMode, FuelBurner, Producer, ProducerKind,
    Warmup,
};
pub use storage::{Accumulator, ExportSink};

use meridian_core::fixed::Fixed64;
use serde::{Deserialize, Serialize};

/// Per-tick world conditions shared by every network on a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Wind turbine output factor.
    pub wind_strength: Fixed64,
    /// Solar output factor before incidence.
    pub luminosity: Fixed64,
    pub sun_direction: Direction,
    /// Incoming ray intensity for gamma-ray receivers; zero means not
    /// receiving.
    pub ray_strength: Fixed64,
    /// Recompute solar incidence this tick regardless of the cache policy.
    pub force_solar_recompute: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            wind_strength: Fixed64::ZERO,
            luminosity: Fixed64::ZERO,
            sun_direction: Direction::UP,
            ray_strength: Fixed64::ZERO,
            force_solar_recompute: false,
        }
    }
}
