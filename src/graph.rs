//! Transition legality and path hints over the status catalog
use crate::status::{OrderStatus, StatusCategory};
use std::collections::VecDeque;

/// True iff `to` is reachable from `from` in one hop.
pub fn can_transition_to(from: OrderStatus, to: OrderStatus) -> bool {
    from.next_statuses().contains(&to)
}

/// Shortest chain of legal single hops from `from` to `to`, both ends included.
///
/// Neighbours are visited in catalog order, so among equally short chains the
/// first one discovered wins. Only meant for hints shown to users; callers never
/// replay the chain as a multi-hop mutation.
pub fn transition_path(from: OrderStatus, to: OrderStatus) -> Option<Vec<OrderStatus>> {
    if from == to {
        return Some(vec![from]);
    }

    let mut visited = [false; OrderStatus::COUNT];
    let mut parent: [Option<OrderStatus>; OrderStatus::COUNT] = [None; OrderStatus::COUNT];
    let mut queue = VecDeque::from([from]);
    visited[from.index()] = true;

    while let Some(current) = queue.pop_front() {
        for &next in current.next_statuses() {
            if visited[next.index()] {
                continue;
            }
            visited[next.index()] = true;
            parent[next.index()] = Some(current);

            if next == to {
                let mut path = vec![to];
                let mut cursor = current;
                path.push(cursor);
                while let Some(prev) = parent[cursor.index()] {
                    path.push(prev);
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back(next);
        }
    }

    None
}

/// Transitions that must go through an approval request instead of a direct write.
///
/// Halting and resuming work always need sign-off. Cancelling needs it once the
/// order has left the lead stage.
pub fn requires_approval(from: OrderStatus, to: OrderStatus) -> bool {
    match (from, to) {
        (OrderStatus::Suspended, _) | (_, OrderStatus::Suspended) => true,
        (from, OrderStatus::Cancelled) => from.category() != StatusCategory::Lead,
        _ => false,
    }
}
