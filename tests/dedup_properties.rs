use std::collections::HashSet;

use chat_stream::message::Message;
use chat_stream::window::{MergeOutcome, MessageWindow};
use proptest::collection::vec;
use proptest::prelude::*;

// ============================================================================
// Generators
// ============================================================================

/// Message `i` of a fixed universe; its timestamp comes from `timestamps`.
fn confirmed(i: usize, timestamps: &[i64]) -> Message {
    Message::confirmed(
        format!("m{i}"),
        "u2",
        "c1",
        format!("text {i}"),
        timestamps[i],
    )
}

fn pending(i: usize, timestamps: &[i64]) -> Message {
    Message::pending("u2", "c1", format!("text {i}"), timestamps[i])
}

/// One delivery of message `i`: as a local pending send or with its id.
#[derive(Debug, Clone, Copy)]
enum Delivery {
    Pending(usize),
    Confirmed(usize),
}

fn arb_delivery() -> impl Strategy<Value = Delivery> {
    prop_oneof![
        (0usize..16).prop_map(Delivery::Pending),
        (0usize..16).prop_map(Delivery::Confirmed),
    ]
}

fn is_sorted(window: &MessageWindow) -> bool {
    let ts: Vec<i64> = window.iter().map(|m| m.timestamp).collect();
    ts.windows(2).all(|w| w[0] <= w[1])
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Merging any multiset of messages keeps one entry per id, and merging
    /// the result again changes nothing.
    #[test]
    fn test_merge_is_idempotent(
        timestamps in vec(0i64..40, 16),
        order in vec(0usize..16, 0..64),
    ) {
        let mut window = MessageWindow::new();
        for &i in &order {
            window.merge(confirmed(i, &timestamps));
        }

        let distinct: HashSet<usize> = order.iter().copied().collect();
        prop_assert_eq!(window.len(), distinct.len());

        let before = window.to_vec();
        for message in before.clone() {
            prop_assert_eq!(window.merge(message), MergeOutcome::Duplicate);
        }
        prop_assert_eq!(window.to_vec(), before);
    }

    /// Whatever the arrival order, the window is sorted by timestamp.
    #[test]
    fn test_window_stays_ordered(
        timestamps in vec(-1_000i64..1_000, 16),
        deliveries in vec(arb_delivery(), 0..64),
    ) {
        let mut window = MessageWindow::new();
        for delivery in deliveries {
            match delivery {
                Delivery::Pending(i) => window.merge(pending(i, &timestamps)),
                Delivery::Confirmed(i) => window.merge(confirmed(i, &timestamps)),
            };
            prop_assert!(is_sorted(&window));
        }
    }

    /// A pending send and its confirmed copies, repeated and interleaved with
    /// other messages, collapse to a single entry.
    #[test]
    fn test_pending_and_confirmed_copies_collapse(
        timestamps in vec(0i64..40, 16),
        deliveries in vec(arb_delivery(), 0..64),
    ) {
        let mut window = MessageWindow::new();
        let mut seen = HashSet::new();
        let mut confirmed_ids = HashSet::new();

        for delivery in deliveries {
            match delivery {
                // A local send never follows its own confirmation.
                Delivery::Pending(i) if confirmed_ids.contains(&format!("m{i}")) => {}
                Delivery::Pending(i) => {
                    seen.insert(i);
                    window.merge(pending(i, &timestamps));
                }
                Delivery::Confirmed(i) => {
                    seen.insert(i);
                    confirmed_ids.insert(format!("m{i}"));
                    window.merge(confirmed(i, &timestamps));
                }
            }
        }

        prop_assert_eq!(window.len(), seen.len());
        for id in &confirmed_ids {
            prop_assert!(window.get_by_id(id).is_some());
        }
        let with_id = window.iter().filter(|m| m.id.is_some()).count();
        prop_assert_eq!(with_id, confirmed_ids.len());
    }
}
