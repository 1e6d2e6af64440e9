//! The per-network balance.

use meridian_core::fixed::{Energy, Fixed64, Ticks, scale_energy, unit_ratio, unit_ratio_fixed};
use meridian_core::id::NetworkId;
use serde::{Deserialize, Serialize};

use crate::config::SolverConfig;
use crate::producer::{ExchangerMode, Producer};
use crate::storage::{Accumulator, ExportSink};
use crate::Environment;

// ---------------------------------------------------------------------------
// Solar cache policy
// ---------------------------------------------------------------------------

/// When solar incidence is recomputed. Between recomputes panels reuse
/// their cached incidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolarCachePolicy {
    pub recompute_period: Ticks,
}

impl SolarCachePolicy {
    pub fn every_tick() -> Self {
        Self {
            recompute_period: 1,
        }
    }

    /// `last` is the tick of the previous recompute, `None` before the first.
    pub fn should_recompute(&self, tick: Ticks, last: Option<Ticks>, forced: bool) -> bool {
        forced || last.is_none() || tick % self.recompute_period.max(1) == 0
    }
}

// ---------------------------------------------------------------------------
// Events and outcome
// ---------------------------------------------------------------------------

/// Emitted on satisfaction transitions only, never every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerEvent {
    /// The network went from fully served to under-served.
    Brownout {
        network: NetworkId,
        /// Demand left unmet after storage discharge.
        deficit: Energy,
        tick: Ticks,
    },
    /// The network is fully served again.
    Restored { network: NetworkId, tick: Ticks },
}

/// Result of one balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickOutcome {
    /// Share of demand that was served, in `[0, 1]`.
    pub consumer_ratio: f64,
    /// `demand / (production - charged)`, in `[0, 1]`.
    pub generator_ratio: f64,
    /// Consumer demand plus node overhead.
    pub demand: Energy,
    /// Total producer capacity this tick.
    pub production: Energy,
    /// Surplus absorbed by accumulators and charging exchangers.
    pub charged: Energy,
    /// Energy drawn from accumulators.
    pub discharged: Energy,
    pub exported: Energy,
    pub events: Vec<PowerEvent>,
}

impl TickOutcome {
    fn idle() -> Self {
        Self {
            consumer_ratio: 1.0,
            generator_ratio: 1.0,
            demand: 0,
            production: 0,
            charged: 0,
            discharged: 0,
            exported: 0,
            events: Vec::new(),
        }
    }

    /// Demand left unmet after discharge. A network with no demand is never
    /// in brownout even though its served ratio reads 0.
    pub fn is_brownout(&self) -> bool {
        self.demand > self.production + self.discharged
    }
}

// ---------------------------------------------------------------------------
// PowerNetwork
// ---------------------------------------------------------------------------

/// One electrical network: its producers, accumulators and optional export
/// sink. Only the worker solving the network touches it during a tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerNetwork {
    pub id: NetworkId,
    pub producers: Vec<Producer>,
    /// Charged and discharged in this order.
    pub accumulators: Vec<Accumulator>,
    pub export: Option<ExportSink>,
    pub node_overhead: Energy,
    pub solar_policy: SolarCachePolicy,
    last_solar_refresh: Option<Ticks>,
    consumer_ratio: f64,
    generator_ratio: f64,
    was_brownout: bool,
}

impl PowerNetwork {
    pub fn new(id: NetworkId, config: &SolverConfig) -> Self {
        Self {
            id,
            producers: Vec::new(),
            accumulators: Vec::new(),
            export: None,
            node_overhead: config.node_overhead.max(0),
            solar_policy: SolarCachePolicy {
                recompute_period: config.solar_recompute_period,
            },
            last_solar_refresh: None,
            consumer_ratio: 1.0,
            generator_ratio: 1.0,
            was_brownout: false,
        }
    }

    pub fn add_producer(&mut self, producer: Producer) {
        self.producers.push(producer);
    }

    pub fn add_accumulator(&mut self, accumulator: Accumulator) {
        self.accumulators.push(accumulator);
    }

    pub fn set_export(&mut self, export: Option<ExportSink>) {
        self.export = export;
    }

    /// Realized served ratio from the last tick. Consumers read this to
    /// scale their own throughput.
    pub fn consumer_ratio(&self) -> f64 {
        self.consumer_ratio
    }

    /// Realized share of capacity used on the last tick.
    pub fn generator_ratio(&self) -> f64 {
        self.generator_ratio
    }

    pub fn is_brownout(&self) -> bool {
        self.was_brownout
    }

    pub fn stored_energy(&self) -> Energy {
        self.accumulators.iter().map(|a| a.stored).sum()
    }

    /// Balance the network for one tick and advance all producer and
    /// storage state exactly once.
    ///
    /// `demand_sum` is the consumers' total demand for this tick; node
    /// overhead is added on top.
    pub fn tick(&mut self, demand_sum: Energy, env: &Environment, tick: Ticks) -> TickOutcome {
        // Solar cache first so capacities below see fresh incidence.
        if self
            .solar_policy
            .should_recompute(tick, self.last_solar_refresh, env.force_solar_recompute)
        {
            for producer in &mut self.producers {
                producer.refresh_solar(env);
            }
            self.last_solar_refresh = Some(tick);
        }

        let demand = demand_sum.max(0).saturating_add(self.node_overhead);

        // Exchanger modes are fixed before the balance.
        let modes: Vec<ExchangerMode> = self.producers.iter().map(Producer::exchanger_mode).collect();
        let capacities: Vec<Energy> = self.producers.iter().map(|p| p.capacity(env)).collect();
        let production: Energy = capacities.iter().sum();

        if production == 0 && demand == 0 && self.producers.is_empty() {
            return self.finish(TickOutcome::idle(), tick);
        }

        let mut charged: Energy = 0;
        let mut discharged: Energy = 0;
        let mut exported: Energy = 0;
        let mut absorbed = vec![0 as Energy; self.producers.len()];

        if production >= demand {
            let mut excess = production - demand;
            for acc in &mut self.accumulators {
                if excess <= 0 {
                    break;
                }
                let taken = acc.charge(excess);
                excess -= taken;
                charged += taken;
            }
            for (slot, mode) in absorbed.iter_mut().zip(&modes) {
                if excess <= 0 {
                    break;
                }
                if let ExchangerMode::Charge(room) = *mode {
                    let taken = room.min(excess);
                    *slot = taken;
                    excess -= taken;
                    charged += taken;
                }
            }
            if let Some(sink) = self.export {
                exported = excess.min(sink.limit()).max(0);
            }
        } else {
            let mut shortfall = demand - production;
            for acc in &mut self.accumulators {
                if shortfall <= 0 {
                    break;
                }
                let released = acc.discharge(shortfall);
                shortfall -= released;
                discharged += released;
            }
        }

        // Energy routed into storage is not generation served; export only
        // drains excess and never raises the generator ratio.
        let quiet = demand == 0 && charged == 0 && discharged == 0;
        let (consumer_ratio, generator_ratio, generator_fixed) = if quiet {
            (0.0, 0.0, Fixed64::ZERO)
        } else {
            let offered = production - charged;
            let (saturated, saturated_fixed) = if demand > 0 {
                (1.0, Fixed64::ONE)
            } else {
                (0.0, Fixed64::ZERO)
            };
            (
                unit_ratio(production + discharged, demand).unwrap_or(1.0),
                unit_ratio(demand, offered).unwrap_or(saturated),
                unit_ratio_fixed(demand, offered).unwrap_or(saturated_fixed),
            )
        };

        for ((producer, &capacity), &taken) in
            self.producers.iter_mut().zip(&capacities).zip(&absorbed)
        {
            let generated = scale_energy(capacity, generator_fixed);
            producer.advance(generated, taken, env);
        }

        let outcome = TickOutcome {
            consumer_ratio,
            generator_ratio,
            demand,
            production,
            charged,
            discharged,
            exported,
            events: Vec::new(),
        };
        self.finish(outcome, tick)
    }

    fn finish(&mut self, mut outcome: TickOutcome, tick: Ticks) -> TickOutcome {
        self.consumer_ratio = outcome.consumer_ratio;
        self.generator_ratio = outcome.generator_ratio;

        let is_brownout = outcome.is_brownout();
        if is_brownout && !self.was_brownout {
            let deficit = outcome.demand - outcome.production - outcome.discharged;
            tracing::debug!(network = self.id.0, deficit, tick, "power brownout");
            outcome.events.push(PowerEvent::Brownout {
                network: self.id,
                deficit,
                tick,
            });
        } else if !is_brownout && self.was_brownout {
            tracing::debug!(network = self.id.0, tick, "power restored");
            outcome.events.push(PowerEvent::Restored {
                network: self.id,
                tick,
            });
        }
        self.was_brownout = is_brownout;

        tracing::trace!(
            network = self.id.0,
            tick,
            consumer_ratio = outcome.consumer_ratio,
            generator_ratio = outcome.generator_ratio,
            "network balanced"
        );
        outcome
    }
}
