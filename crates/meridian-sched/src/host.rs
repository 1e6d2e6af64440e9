//! The boundary to the host simulation.
//!
//! The host owns every machine and every power network. The runtime only
//! asks it questions between ticks and calls back into it for each work
//! item; callbacks are opaque, bounded-time operations and may run on any
//! worker thread.

use crossbeam_channel::{Receiver, Sender, unbounded};

use meridian_core::fixed::Ticks;
use meridian_core::graph::{Link, Machine};
use meridian_core::id::HostMapId;
use meridian_core::partition::SubUnit;

use crate::error::WorkError;

pub trait SimulationHost: Sync {
    // -- queries, called on the ticking thread before scheduling ------------

    fn machines(&self, map: HostMapId) -> Vec<Machine>;

    fn links(&self, map: HostMapId) -> Vec<Link>;

    /// Monotonic counter bumped by every structural edit of the map.
    fn structural_edit_counter(&self, map: HostMapId) -> u64;

    /// Whether a player is looking at the map this tick.
    fn is_observed(&self, map: HostMapId) -> bool;

    fn power_network_count(&self, map: HostMapId) -> usize;

    // -- work callbacks, called from workers --------------------------------

    fn prepare(&self, _map: HostMapId, _tick: Ticks) -> Result<(), WorkError> {
        Ok(())
    }

    fn solve_power_network(&self, map: HostMapId, network: usize, tick: Ticks) -> Result<(), WorkError>;

    fn simulate_sub_unit(&self, map: HostMapId, unit: &SubUnit, tick: Ticks) -> Result<(), WorkError>;

    /// Simulate slice `chunk` of `chunk_count` of an unpartitioned map.
    fn simulate_legacy_chunk(
        &self,
        map: HostMapId,
        chunk: usize,
        chunk_count: usize,
        tick: Ticks,
    ) -> Result<(), WorkError>;

    fn finalize(&self, _map: HostMapId, _tick: Ticks) -> Result<(), WorkError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Map notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapEvent {
    Added(HostMapId),
    Removed(HostMapId),
}

/// Cloneable, thread-safe handle a host uses to announce map creation and
/// removal. Events are applied at the start of the next tick.
#[derive(Debug, Clone)]
pub struct MapNotifier {
    sender: Sender<MapEvent>,
}

impl MapNotifier {
    pub fn added(&self, map: HostMapId) {
        self.send(MapEvent::Added(map));
    }

    pub fn removed(&self, map: HostMapId) {
        self.send(MapEvent::Removed(map));
    }

    fn send(&self, event: MapEvent) {
        if self.sender.send(event).is_err() {
            tracing::warn!(?event, "runtime dropped, map event discarded");
        }
    }
}

/// Create a notifier and the receiving end the runtime drains.
pub fn map_channel() -> (MapNotifier, Receiver<MapEvent>) {
    let (sender, receiver) = unbounded();
    (MapNotifier { sender }, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_in_order() {
        let (notifier, rx) = map_channel();
        notifier.added(HostMapId(1));
        notifier.clone().removed(HostMapId(1));
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events, vec![MapEvent::Added(HostMapId(1)), MapEvent::Removed(HostMapId(1))]);
    }

    #[test]
    fn send_after_receiver_dropped_is_harmless() {
        let (notifier, rx) = map_channel();
        drop(rx);
        notifier.added(HostMapId(2));
    }

    #[test]
    fn notifier_is_usable_from_other_threads() {
        let (notifier, rx) = map_channel();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let n = notifier.clone();
                std::thread::spawn(move || n.added(HostMapId(i)))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(rx.try_iter().count(), 4);
    }
}
