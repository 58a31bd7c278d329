//! Property-based tests for the transition graph
//!
//! The catalog is small enough to enumerate, but proptest shrinks failures down
//! to the pair of statuses that broke, which is what you want when editing the
//! tables by hand.

use proptest::prelude::*;
use order_workflow::{
    graph::{can_transition_to, requires_approval, transition_path},
    status::{OrderStatus, StatusCategory},
};
use std::collections::HashSet;

// These property tests cover:
//
// 1. Paths are made of legal hops and start and end where asked
// 2. Terminal statuses are really terminal
// 3. Suspension is reachable from everywhere that is still live
// 4. Path search returns a shortest chain
// 5. Approval rules only ever guard legal moves out of live statuses
//

/// Strategy to pick any catalog status
fn status_strategy() -> impl Strategy<Value = OrderStatus> {
    (0..OrderStatus::COUNT).prop_map(|i| OrderStatus::ALL[i])
}

fn terminal_strategy() -> impl Strategy<Value = OrderStatus> {
    prop_oneof![
        Just(OrderStatus::Completed),
        Just(OrderStatus::Cancelled),
        Just(OrderStatus::Expired),
    ]
}

// plain breadth-first distance, used as the oracle for minimality
fn distance(from: OrderStatus, to: OrderStatus) -> Option<usize> {
    let mut seen = HashSet::from([from]);
    let mut frontier = vec![from];
    let mut hops = 0;

    while !frontier.is_empty() {
        if frontier.contains(&to) {
            return Some(hops);
        }
        frontier = frontier
            .iter()
            .flat_map(|s| s.next_statuses().iter().copied())
            .filter(|s| seen.insert(*s))
            .collect();
        hops += 1;
    }
    None
}

proptest! {
    /// Property: every returned path is a chain of legal single hops from `from` to `to`
    #[test]
    fn prop_paths_are_chains_of_legal_hops(from in status_strategy(), to in status_strategy()) {
        if let Some(path) = transition_path(from, to) {
            prop_assert_eq!(path.first(), Some(&from));
            prop_assert_eq!(path.last(), Some(&to));
            for hop in path.windows(2) {
                prop_assert!(
                    can_transition_to(hop[0], hop[1]),
                    "{} -> {} is not a legal hop", hop[0], hop[1]
                );
            }
        }
    }

    /// Property: nothing other than the status itself is reachable from a terminal status
    #[test]
    fn prop_terminal_statuses_have_no_way_out(
        from in terminal_strategy(),
        to in status_strategy(),
    ) {
        prop_assert!(from.next_statuses().is_empty());
        prop_assert!(!can_transition_to(from, to));
        if from != to {
            prop_assert_eq!(transition_path(from, to), None);
        }
    }

    /// Property: every live status can be suspended in one hop
    #[test]
    fn prop_live_statuses_can_be_suspended(status in status_strategy()) {
        prop_assume!(!status.is_terminal() && status != OrderStatus::Suspended);
        prop_assert!(can_transition_to(status, OrderStatus::Suspended));
        prop_assert!(requires_approval(status, OrderStatus::Suspended));
    }

    /// Property: the path search finds a shortest chain whenever one exists
    #[test]
    fn prop_paths_are_minimal(from in status_strategy(), to in status_strategy()) {
        let path = transition_path(from, to);
        let oracle = distance(from, to);

        prop_assert_eq!(path.is_some(), oracle.is_some());
        if let (Some(path), Some(hops)) = (path, oracle) {
            prop_assert_eq!(path.len(), hops + 1);
        }
    }

    /// Property: a suspended order resumes into the ordinary flow or is cancelled,
    /// it never jumps to completion or back into an exception status
    #[test]
    fn prop_resume_targets_are_live(to in status_strategy()) {
        if can_transition_to(OrderStatus::Suspended, to) {
            prop_assert!(
                to == OrderStatus::Cancelled
                    || (!to.is_terminal() && to.category() != StatusCategory::Exception),
                "suspended orders may not move to {}", to
            );
        }
    }
}
