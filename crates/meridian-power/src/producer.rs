//! Producer models.
//!
//! A producer exposes a per-tick capacity (what it could deliver this tick)
//! and is advanced once per tick with the energy it actually generated.

use meridian_core::fixed::{Energy, Fixed64, clamp_unit, scale_energy, unscale_energy_ceil};
use meridian_core::id::MachineId;
use serde::{Deserialize, Serialize};

use crate::Environment;

/// Share of a gamma-ray receiver's rated output available while cold.
pub const GAMMA_BASE_FRACTION: Fixed64 = Fixed64::from_bits(0x4000_0000); // 0.25

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// A direction vector in fixed point. Not required to be normalized, but
/// incidence is only meaningful for unit vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Direction {
    pub x: Fixed64,
    pub y: Fixed64,
    pub z: Fixed64,
}

impl Direction {
    pub const UP: Self = Self {
        x: Fixed64::ZERO,
        y: Fixed64::ZERO,
        z: Fixed64::ONE,
    };

    pub fn new(x: Fixed64, y: Fixed64, z: Fixed64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Self) -> Fixed64 {
        self.x.saturating_mul(other.x)
            .saturating_add(self.y.saturating_mul(other.y))
            .saturating_add(self.z.saturating_mul(other.z))
    }
}

// ---------------------------------------------------------------------------
// Warm-up
// ---------------------------------------------------------------------------

/// A progress value in `[0, 1]` that ramps up while active and decays
/// otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warmup {
    pub progress: Fixed64,
    /// Added per active tick.
    pub ramp: Fixed64,
    /// Subtracted per inactive tick.
    pub decay: Fixed64,
}

impl Warmup {
    pub fn new(ramp: Fixed64, decay: Fixed64) -> Self {
        Self {
            progress: Fixed64::ZERO,
            ramp,
            decay,
        }
    }

    pub fn advance(&mut self, active: bool) {
        let next = if active {
            self.progress.saturating_add(self.ramp)
        } else {
            self.progress.saturating_sub(self.decay)
        };
        self.progress = clamp_unit(next);
    }
}

// ---------------------------------------------------------------------------
// Fuel burner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuelBurner {
    /// Energy already released into the burner.
    pub burner_energy: Energy,
    /// Unburnt fuel items in the inventory.
    pub items: u32,
    pub heat_per_item: Energy,
    /// Fuel energy -> electrical energy conversion ratio.
    pub ratio: Fixed64,
}

impl FuelBurner {
    fn fuel_energy(&self) -> Energy {
        self.burner_energy
            .saturating_add((self.items as Energy).saturating_mul(self.heat_per_item))
    }

    /// Consume the fuel needed to generate `generated`, burning items from
    /// the inventory only when the burner runs dry.
    fn burn(&mut self, generated: Energy) {
        let Some(needed) = unscale_energy_ceil(generated, self.ratio) else {
            return;
        };
        while self.burner_energy < needed && self.items > 0 {
            self.items -= 1;
            self.burner_energy = self.burner_energy.saturating_add(self.heat_per_item);
        }
        self.burner_energy -= needed.min(self.burner_energy);
    }
}

// ---------------------------------------------------------------------------
// Exchanger
// ---------------------------------------------------------------------------

/// Direction the host wants an exchanger to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangerDirection {
    Charge,
    Discharge,
}

/// What an exchanger does during one balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangerMode {
    Idle,
    /// Adds up to this much to production.
    Discharge(Energy),
    /// Accepts up to this much of the surplus.
    Charge(Energy),
}

/// A bidirectional cell: stores energy when charging and returns it when
/// discharging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchanger {
    pub direction: ExchangerDirection,
    pub stored: Energy,
    pub capacity: Energy,
}

impl Exchanger {
    /// Decide this tick's mode. `rate` is the producer's rated throughput.
    pub fn mode(&self, rate: Energy) -> ExchangerMode {
        match self.direction {
            ExchangerDirection::Discharge if self.stored > 0 => {
                ExchangerMode::Discharge(rate.min(self.stored))
            }
            ExchangerDirection::Charge if self.stored < self.capacity => {
                ExchangerMode::Charge(rate.min(self.capacity - self.stored))
            }
            _ => ExchangerMode::Idle,
        }
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProducerKind {
    Wind,
    Solar {
        normal: Direction,
        /// Last computed incidence factor, reused between recomputes.
        cached_incidence: Option<Fixed64>,
    },
    GammaRay {
        warmup: Warmup,
    },
    Geothermal {
        site_strength: Fixed64,
        warmup: Warmup,
    },
    Fuel(FuelBurner),
    Exchanger(Exchanger),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Producer {
    pub machine: MachineId,
    /// Maximum output per tick.
    pub rated: Energy,
    pub kind: ProducerKind,
    /// Energy generated on the last tick.
    pub last_output: Energy,
}

impl Producer {
    pub fn new(machine: MachineId, rated: Energy, kind: ProducerKind) -> Self {
        Self {
            machine,
            rated: rated.max(0),
            kind,
            last_output: 0,
        }
    }

    pub fn wind(machine: MachineId, rated: Energy) -> Self {
        Self::new(machine, rated, ProducerKind::Wind)
    }

    pub fn solar(machine: MachineId, rated: Energy, normal: Direction) -> Self {
        Self::new(
            machine,
            rated,
            ProducerKind::Solar {
                normal,
                cached_incidence: None,
            },
        )
    }

    pub fn gamma_ray(machine: MachineId, rated: Energy, warmup: Warmup) -> Self {
        Self::new(machine, rated, ProducerKind::GammaRay { warmup })
    }

    pub fn geothermal(machine: MachineId, rated: Energy, site_strength: Fixed64, warmup: Warmup) -> Self {
        Self::new(
            machine,
            rated,
            ProducerKind::Geothermal {
                site_strength,
                warmup,
            },
        )
    }

    pub fn fuel(machine: MachineId, rated: Energy, burner: FuelBurner) -> Self {
        Self::new(machine, rated, ProducerKind::Fuel(burner))
    }

    pub fn exchanger(machine: MachineId, rated: Energy, exchanger: Exchanger) -> Self {
        Self::new(machine, rated, ProducerKind::Exchanger(exchanger))
    }

    /// Refresh a solar panel's cached incidence. No-op for other kinds.
    pub(crate) fn refresh_solar(&mut self, env: &Environment) {
        if let ProducerKind::Solar {
            normal,
            cached_incidence,
        } = &mut self.kind
        {
            *cached_incidence = Some(clamp_unit(normal.dot(env.sun_direction)));
        }
    }

    /// Exchanger mode for this tick, `Idle` for other kinds.
    pub fn exchanger_mode(&self) -> ExchangerMode {
        match &self.kind {
            ProducerKind::Exchanger(cell) => cell.mode(self.rated),
            _ => ExchangerMode::Idle,
        }
    }

    /// What this producer could deliver this tick.
    pub fn capacity(&self, env: &Environment) -> Energy {
        let rated = self.rated;
        let capacity = match &self.kind {
            ProducerKind::Wind => scale_energy(rated, clamp_unit(env.wind_strength)),
            ProducerKind::Solar {
                cached_incidence, ..
            } => {
                let incidence = cached_incidence.unwrap_or(Fixed64::ZERO);
                scale_energy(scale_energy(rated, clamp_unit(env.luminosity)), incidence)
            }
            ProducerKind::GammaRay { warmup } => {
                let warm = GAMMA_BASE_FRACTION
                    + (Fixed64::ONE - GAMMA_BASE_FRACTION).saturating_mul(warmup.progress);
                scale_energy(scale_energy(rated, clamp_unit(env.ray_strength)), warm)
            }
            ProducerKind::Geothermal {
                site_strength,
                warmup,
            } => scale_energy(scale_energy(rated, clamp_unit(*site_strength)), warmup.progress),
            ProducerKind::Fuel(burner) => {
                rated.min(scale_energy(burner.fuel_energy(), burner.ratio))
            }
            ProducerKind::Exchanger(_) => match self.exchanger_mode() {
                ExchangerMode::Discharge(amount) => amount,
                _ => 0,
            },
        };
        capacity.max(0)
    }

    /// Apply one tick: record `generated`, burn fuel, drain or fill cells,
    /// move warm-ups. `absorbed` is energy accepted by a charging exchanger.
    pub(crate) fn advance(&mut self, generated: Energy, absorbed: Energy, env: &Environment) {
        self.last_output = generated;
        match &mut self.kind {
            ProducerKind::Wind | ProducerKind::Solar { .. } => {}
            ProducerKind::GammaRay { warmup } => warmup.advance(env.ray_strength > Fixed64::ZERO),
            ProducerKind::Geothermal { warmup, .. } => warmup.advance(true),
            ProducerKind::Fuel(burner) => burner.burn(generated),
            ProducerKind::Exchanger(cell) => {
                cell.stored = (cell.stored - generated + absorbed).clamp(0, cell.capacity);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::test_utils::fixed;

    fn env() -> Environment {
        Environment::default()
    }

    #[test]
    fn wind_scales_with_strength() {
        let p = Producer::wind(MachineId(0), 200);
        let mut e = env();
        e.wind_strength = fixed(0.5);
        assert_eq!(p.capacity(&e), 100);
        e.wind_strength = fixed(1.5);
        assert_eq!(p.capacity(&e), 200);
    }

    #[test]
    fn solar_uses_cached_incidence() {
        let mut p = Producer::solar(MachineId(0), 100, Direction::UP);
        let mut e = env();
        e.luminosity = Fixed64::ONE;
        e.sun_direction = Direction::UP;
        assert_eq!(p.capacity(&e), 0, "no incidence before first refresh");

        p.refresh_solar(&e);
        assert_eq!(p.capacity(&e), 100);

        // Sun sets but the cache has not been refreshed.
        e.sun_direction = Direction::new(Fixed64::ZERO, Fixed64::ZERO, -Fixed64::ONE);
        assert_eq!(p.capacity(&e), 100);
        p.refresh_solar(&e);
        assert_eq!(p.capacity(&e), 0);
    }

    #[test]
    fn gamma_ray_has_base_output_when_cold() {
        let p = Producer::gamma_ray(MachineId(0), 400, Warmup::new(fixed(0.5), fixed(0.25)));
        let mut e = env();
        e.ray_strength = Fixed64::ONE;
        assert_eq!(p.capacity(&e), 100);
    }

    #[test]
    fn gamma_ray_warms_and_decays() {
        let mut p = Producer::gamma_ray(MachineId(0), 400, Warmup::new(fixed(0.5), fixed(0.25)));
        let mut e = env();
        e.ray_strength = Fixed64::ONE;
        p.advance(0, 0, &e);
        p.advance(0, 0, &e);
        assert_eq!(p.capacity(&e), 400);

        e.ray_strength = Fixed64::ZERO;
        p.advance(0, 0, &e);
        let ProducerKind::GammaRay { warmup } = &p.kind else {
            panic!("expected gamma ray");
        };
        assert_eq!(warmup.progress, fixed(0.75));
    }

    #[test]
    fn geothermal_ramps_to_full() {
        let mut p = Producer::geothermal(MachineId(0), 100, Fixed64::ONE, Warmup::new(fixed(0.5), Fixed64::ZERO));
        let e = env();
        assert_eq!(p.capacity(&e), 0);
        p.advance(0, 0, &e);
        assert_eq!(p.capacity(&e), 50);
        p.advance(50, 0, &e);
        p.advance(100, 0, &e);
        assert_eq!(p.capacity(&e), 100);
    }

    #[test]
    fn fuel_capped_by_rating_and_fuel() {
        let burner = FuelBurner {
            burner_energy: 0,
            items: 2,
            heat_per_item: 100,
            ratio: fixed(0.5),
        };
        let p = Producer::fuel(MachineId(0), 60, burner);
        assert_eq!(p.capacity(&env()), 60);

        let small = Producer::fuel(MachineId(0), 500, burner);
        assert_eq!(small.capacity(&env()), 100);
    }

    #[test]
    fn fuel_burns_items_only_when_needed() {
        let burner = FuelBurner {
            burner_energy: 30,
            items: 3,
            heat_per_item: 100,
            ratio: fixed(0.5),
        };
        let mut p = Producer::fuel(MachineId(0), 1_000, burner);
        // 40 generated needs 80 fuel energy: 30 in burner + one item.
        p.advance(40, 0, &env());
        let ProducerKind::Fuel(b) = p.kind else {
            panic!("expected fuel");
        };
        assert_eq!(b.items, 2);
        assert_eq!(b.burner_energy, 50);
    }

    #[test]
    fn exchanger_modes() {
        let cell = Exchanger {
            direction: ExchangerDirection::Discharge,
            stored: 30,
            capacity: 100,
        };
        assert_eq!(cell.mode(50), ExchangerMode::Discharge(30));

        let empty = Exchanger { stored: 0, ..cell };
        assert_eq!(empty.mode(50), ExchangerMode::Idle);

        let charging = Exchanger {
            direction: ExchangerDirection::Charge,
            ..cell
        };
        assert_eq!(charging.mode(50), ExchangerMode::Charge(50));

        let full = Exchanger {
            direction: ExchangerDirection::Charge,
            stored: 100,
            capacity: 100,
        };
        assert_eq!(full.mode(50), ExchangerMode::Idle);
    }

    #[test]
    fn direction_dot() {
        let a = Direction::new(fixed(0.6), Fixed64::ZERO, fixed(0.8));
        assert_eq!(a.dot(Direction::UP), fixed(0.8));
    }
}
