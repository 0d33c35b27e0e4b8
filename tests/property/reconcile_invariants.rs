#![allow(clippy::unwrap_used, clippy::panic)]

//! Property-based tests for stream reconciliation.
//!
//! Uses proptest to verify:
//! 1. Accepted live records never repeat the `(source, payload)` of the
//!    record accepted just before them.
//! 2. Exactly the adjacent repeats are dropped: the accepted stream equals
//!    the input with runs of identical keys collapsed.
//! 3. Live records that arrive during the initial load come out after the
//!    history page, under the same collapsing rule.
//! 4. Older pages never contain adjacent repeats and never end with a
//!    repeat of the record they are prepended to.

use chrono::{DateTime, Utc};
use loramesh::reconcile::Reconciler;
use loramesh_proto::message::{LOCAL_SOURCE, MessageRecord};
use proptest::prelude::*;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Records drawn from a tiny alphabet so that repeats are common.
fn arb_record() -> impl Strategy<Value = MessageRecord> {
    (
        prop_oneof![Just("node-1"), Just("node-2"), Just(LOCAL_SOURCE)],
        prop_oneof![Just("ping"), Just("pong"), Just("hello")],
        0i64..1_000,
    )
        .prop_map(|(source, payload, secs)| MessageRecord::new(source, payload, at(secs)))
}

fn keys(records: &[MessageRecord]) -> Vec<(String, String)> {
    records
        .iter()
        .map(|r| (r.source.clone(), r.payload.clone()))
        .collect()
}

/// Reference model: collapse runs of equal keys.
fn collapsed(records: &[MessageRecord]) -> Vec<(String, String)> {
    let mut out = keys(records);
    out.dedup();
    out
}

fn has_adjacent_repeat(records: &[MessageRecord]) -> bool {
    records.windows(2).any(|w| w[0].key() == w[1].key())
}

proptest! {
    #[test]
    fn accepted_live_stream_has_no_adjacent_repeats(
        input in prop::collection::vec(arb_record(), 0..64),
    ) {
        let mut reconciler = Reconciler::new();
        let accepted: Vec<_> = input
            .iter()
            .cloned()
            .filter_map(|r| reconciler.accept_live(r))
            .collect();
        prop_assert!(!has_adjacent_repeat(&accepted));
    }

    #[test]
    fn only_adjacent_repeats_are_dropped(
        input in prop::collection::vec(arb_record(), 0..64),
    ) {
        let mut reconciler = Reconciler::new();
        let accepted: Vec<_> = input
            .iter()
            .cloned()
            .filter_map(|r| reconciler.accept_live(r))
            .collect();
        prop_assert_eq!(keys(&accepted), collapsed(&input));
    }

    #[test]
    fn history_precedes_live_records_held_during_load(
        history in prop::collection::vec(arb_record(), 0..24),
        early_live in prop::collection::vec(arb_record(), 0..24),
        late_live in prop::collection::vec(arb_record(), 0..24),
    ) {
        let mut reconciler = Reconciler::new();
        reconciler.begin_initial_load();
        for record in early_live.iter().cloned() {
            prop_assert!(reconciler.accept_live(record).is_none());
        }
        let mut accepted = reconciler.accept_history(history.clone());
        accepted.extend(reconciler.finish_initial_load());
        accepted.extend(late_live.iter().cloned().filter_map(|r| reconciler.accept_live(r)));

        let mut expected_input = history;
        expected_input.extend(early_live);
        expected_input.extend(late_live);
        prop_assert_eq!(keys(&accepted), collapsed(&expected_input));
    }

    #[test]
    fn older_pages_join_the_view_without_repeats(
        initial in prop::collection::vec(arb_record(), 1..16),
        older in prop::collection::vec(arb_record(), 0..16),
    ) {
        let mut reconciler = Reconciler::new();
        let view = reconciler.accept_history(initial);
        let oldest = view.first().unwrap().key();
        let last = reconciler.last_accepted().cloned();

        let prepended = reconciler.accept_older(older);
        prop_assert!(!has_adjacent_repeat(&prepended));
        if let Some(newest) = prepended.last() {
            prop_assert!(!oldest.matches(newest));
        }
        // Backward paging never disturbs the live dedup slot.
        prop_assert_eq!(reconciler.last_accepted().cloned(), last);
    }
}
