//! Property-based tests for claiming and phase advancement.

use std::collections::HashSet;

use meridian_core::id::HostMapId;
use meridian_sched::{MapTracker, Phase, PhaseKind, Progress, Scheduler, WorkItem, WorkPlan};
use parking_lot::Mutex;
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

fn arb_plan(map: u64) -> impl Strategy<Value = WorkPlan> {
    proptest::collection::vec(0..6usize, 1..=PhaseKind::ALL.len()).prop_map(move |counts| {
        let phases = counts
            .into_iter()
            .zip(PhaseKind::ALL)
            .map(|(n, kind)| Phase::items(kind, n))
            .collect();
        WorkPlan::new(HostMapId(map), phases)
    })
}

fn arb_plans() -> impl Strategy<Value = Vec<WorkPlan>> {
    (1..5u64).prop_flat_map(|n| (0..n).map(arb_plan).collect::<Vec<_>>())
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_item_runs_exactly_once(plans in arb_plans(), threads in 1..5usize) {
        let seen = Mutex::new(Vec::new());
        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
        let report = Scheduler::new(&plans)
            .run(
                |item: &WorkItem| {
                    seen.lock().push((item.slot, item.phase_index, item.item));
                    Ok(())
                },
                &pool,
            )
            .unwrap();

        let expected: usize = plans.iter().map(WorkPlan::item_count).sum();
        let seen = seen.into_inner();
        let unique: HashSet<_> = seen.iter().copied().collect();
        prop_assert_eq!(report.items_executed, expected);
        prop_assert_eq!(seen.len(), expected);
        prop_assert_eq!(unique.len(), expected);
    }

    #[test]
    fn sequential_claims_follow_phase_order(plan in arb_plan(0)) {
        let tracker = MapTracker::new(&plan);
        let mut order = Vec::new();
        let mut done = plan.item_count() == 0;
        prop_assert_eq!(tracker.is_done(), done);

        while let Some((phase_index, _item)) = tracker.try_claim() {
            order.push(phase_index);
            let progress = tracker.complete(phase_index).unwrap();
            if progress == Progress::MapDone {
                done = true;
            }
        }

        prop_assert!(done);
        prop_assert!(tracker.is_done());
        prop_assert_eq!(order.len(), plan.item_count());
        prop_assert!(order.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn claims_stop_at_phase_boundary(plan in arb_plan(0)) {
        let tracker = MapTracker::new(&plan);
        let Some(first_total) = tracker.phase_total(0) else {
            return Ok(());
        };
        let mut claimed = 0;
        while tracker.try_claim().is_some() {
            claimed += 1;
        }
        // Nothing completed yet, so only the first phase is claimable.
        prop_assert_eq!(claimed, first_total);
        prop_assert_eq!(tracker.cursor(), 0);
    }
}
