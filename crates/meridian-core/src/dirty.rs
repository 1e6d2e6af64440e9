use std::sync::atomic::{AtomicU64, Ordering};

/// The structural edit signal for one map.
///
/// Whatever owns structural edits (machine placed or removed, link changed)
/// calls [`mark_dirty`](EditCounter::mark_dirty). The runtime polls
/// [`current`](EditCounter::current) once per tick and compares it with the
/// value its cached partition was built against. Interior-mutable so a host
/// can raise it from any thread through a shared reference.
#[derive(Debug, Default)]
pub struct EditCounter {
    value: AtomicU64,
}

impl EditCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a structural edit. Returns the new counter value.
    pub fn mark_dirty(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn current(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Returns `true` if edits happened since `seen` was sampled.
    pub fn changed_since(&self, seen: u64) -> bool {
        self.current() != seen
    }
}

impl Clone for EditCounter {
    fn clone(&self) -> Self {
        Self {
            value: AtomicU64::new(self.current()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counter_initially_zero() {
        let counter = EditCounter::new();
        assert_eq!(counter.current(), 0);
        assert!(!counter.changed_since(0));
    }

    #[test]
    fn mark_dirty_increments() {
        let counter = EditCounter::new();
        assert_eq!(counter.mark_dirty(), 1);
        assert_eq!(counter.mark_dirty(), 2);
        assert!(counter.changed_since(0));
        assert!(!counter.changed_since(2));
    }

    #[test]
    fn marks_from_many_threads_are_all_counted() {
        let counter = Arc::new(EditCounter::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        c.mark_dirty();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.current(), 1000);
    }

    #[test]
    fn clone_snapshots_value() {
        let counter = EditCounter::new();
        counter.mark_dirty();
        let copy = counter.clone();
        counter.mark_dirty();
        assert_eq!(copy.current(), 1);
        assert_eq!(counter.current(), 2);
    }
}
