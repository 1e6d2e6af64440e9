use meridian_core::fixed::{Energy, Fixed64, scale_energy};
use meridian_core::id::MachineId;
use serde::{Deserialize, Serialize};

/// An accumulator with independent charge and discharge caps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accumulator {
    pub machine: MachineId,
    pub capacity: Energy,
    /// Stored energy, kept in `[0, capacity]`.
    pub stored: Energy,
    /// Maximum charge per tick.
    pub input_cap: Energy,
    /// Maximum discharge per tick.
    pub output_cap: Energy,
}

impl Accumulator {
    pub fn new(machine: MachineId, capacity: Energy, input_cap: Energy, output_cap: Energy) -> Self {
        Self {
            machine,
            capacity: capacity.max(0),
            stored: 0,
            input_cap: input_cap.max(0),
            output_cap: output_cap.max(0),
        }
    }

    pub fn with_stored(mut self, stored: Energy) -> Self {
        self.stored = stored.clamp(0, self.capacity);
        self
    }

    pub fn headroom(&self) -> Energy {
        (self.capacity - self.stored).max(0)
    }

    /// Accept up to `offered`; returns the amount taken.
    pub fn charge(&mut self, offered: Energy) -> Energy {
        let taken = offered.min(self.input_cap).min(self.headroom()).max(0);
        self.stored += taken;
        taken
    }

    /// Release up to `wanted`; returns the amount released.
    pub fn discharge(&mut self, wanted: Energy) -> Energy {
        let released = wanted.min(self.output_cap).min(self.stored).max(0);
        self.stored -= released;
        released
    }
}

/// Optional sink that takes surplus after storage is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSink {
    /// Energy the receiving side asks for this tick. Updated by the host.
    pub demand: Energy,
    /// Share of `demand` this network may satisfy.
    pub ratio: Fixed64,
}

impl ExportSink {
    pub fn limit(&self) -> Energy {
        scale_energy(self.demand.max(0), self.ratio).max(0)
    }
}
