//! Map lifecycle: when a map may use its partition.
//!
//! ```text
//!  Stopped{since} --(cooldown over, not observed)--> Queued
//!  Queued --(dequeued, partition rebuilt)--> Running
//!  Queued --(observed)--> Stopped{since: now}
//!  Running --(structural edit | observed)--> Stopped{since: now}
//! ```
//!
//! New maps skip the cooldown. Only `Running` maps get the optimized plan.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

use meridian_core::fixed::Ticks;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Stopped { since: Ticks },
    Queued,
    Running,
}

/// What the caller must do with the reoptimization queue after a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    /// The map became eligible; push it.
    Enqueue,
    /// The map left the queue; remove it.
    Dequeue,
    /// The map stopped running.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapLifecycle {
    state: LifecycleState,
    /// Never run yet: eligible without a cooldown.
    fresh: bool,
    /// Edit counter the running partition was built for.
    running_for: Option<u64>,
}

impl MapLifecycle {
    pub fn new(now: Ticks) -> Self {
        Self {
            state: LifecycleState::Stopped { since: now },
            fresh: true,
            running_for: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == LifecycleState::Running
    }

    /// Poll once per tick with the host's current edit counter and
    /// observation flag.
    pub fn poll(&mut self, now: Ticks, edit_counter: u64, observed: bool, cooldown: Ticks) -> Transition {
        match self.state {
            LifecycleState::Running => {
                let edited = self.running_for != Some(edit_counter);
                if edited || observed {
                    tracing::debug!(now, edited, observed, "map stopped");
                    self.stop(now);
                    Transition::Stopped
                } else {
                    Transition::None
                }
            }
            LifecycleState::Queued => {
                if observed {
                    self.state = LifecycleState::Stopped { since: now };
                    Transition::Dequeue
                } else {
                    Transition::None
                }
            }
            LifecycleState::Stopped { since } => {
                let cooled = self.fresh || now.saturating_sub(since) >= cooldown;
                if cooled && !observed {
                    self.state = LifecycleState::Queued;
                    Transition::Enqueue
                } else {
                    Transition::None
                }
            }
        }
    }

    /// Queue a stopped map regardless of cooldown. Returns whether it was
    /// queued.
    pub fn force_queue(&mut self) -> bool {
        match self.state {
            LifecycleState::Stopped { .. } => {
                self.state = LifecycleState::Queued;
                true
            }
            _ => false,
        }
    }

    /// A queued map got its partition rebuilt for `edit_counter`.
    pub fn start(&mut self, edit_counter: u64) {
        self.state = LifecycleState::Running;
        self.fresh = false;
        self.running_for = Some(edit_counter);
    }

    pub fn stop(&mut self, now: Ticks) {
        self.state = LifecycleState::Stopped { since: now };
        self.running_for = None;
    }
}

// ---------------------------------------------------------------------------
// ReoptimizationQueue
// ---------------------------------------------------------------------------

/// FIFO of maps waiting for a partition rebuild. A map is queued at most
/// once.
#[derive(Debug, Clone)]
pub struct ReoptimizationQueue<K> {
    order: VecDeque<K>,
    members: HashSet<K>,
}

impl<K: Copy + Eq + Hash> Default for ReoptimizationQueue<K> {
    fn default() -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }
}

impl<K: Copy + Eq + Hash> ReoptimizationQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if already queued.
    pub fn push(&mut self, key: K) -> bool {
        if !self.members.insert(key) {
            return false;
        }
        self.order.push_back(key);
        true
    }

    pub fn remove(&mut self, key: K) -> bool {
        if !self.members.remove(&key) {
            return false;
        }
        self.order.retain(|k| *k != key);
        true
    }

    pub fn contains(&self, key: K) -> bool {
        self.members.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Take at most `max` keys in FIFO order.
    pub fn pop_batch(&mut self, max: usize) -> Vec<K> {
        let take = max.min(self.order.len());
        let batch: Vec<K> = self.order.drain(..take).collect();
        for key in &batch {
            self.members.remove(key);
        }
        batch
    }
}
