//! Merges history pages, live pushes and local sends into one stream.
//!
//! Duplicate suppression is a single slot: a record is dropped only when it
//! has the same `(source, payload)` as the record accepted immediately
//! before it. A repeat that is two or more records back is kept. This is
//! what absorbs the gateway's echo of a message we already showed
//! optimistically, and a live push of the record that closed the history
//! page.
//!
//! While the initial history load is in flight, live records are held back
//! and evaluated after the page has seeded the slot, so history always
//! precedes the live records that arrived during the load.
//!
//! Older pages are matched against the head of the view: when the newest
//! records of a page repeat the oldest records already shown, that overlap
//! is cut before the page is prepended.

use std::collections::VecDeque;

use loramesh_proto::message::{MessageRecord, RecordKey};

/// Oldest records of the view remembered for trimming older pages.
const HEAD_WINDOW: usize = 1000;

/// Stream reconciler state. Owned by one session; not shared.
#[derive(Debug, Default)]
pub struct Reconciler {
    /// Dedup slot: identity of the most recently accepted record.
    last_accepted: Option<RecordKey>,
    /// Identities of the oldest records in the view, oldest first.
    head: VecDeque<RecordKey>,
    history_pending: bool,
    queued_live: Vec<MessageRecord>,
}

impl Reconciler {
    /// An empty reconciler that accepts live records immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold back live records until the initial page is applied.
    pub const fn begin_initial_load(&mut self) {
        self.history_pending = true;
    }

    /// Whether live records are currently being held back.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.history_pending
    }

    /// Identity in the dedup slot.
    #[must_use]
    pub const fn last_accepted(&self) -> Option<&RecordKey> {
        self.last_accepted.as_ref()
    }

    /// Apply the initial history page (ascending). Returns the accepted
    /// records; held-back live records stay queued until
    /// [`finish_initial_load`](Self::finish_initial_load).
    pub fn accept_history(&mut self, page: Vec<MessageRecord>) -> Vec<MessageRecord> {
        page.into_iter().filter_map(|r| self.admit(r)).collect()
    }

    /// End the initial load, successful or not, and evaluate the live
    /// records held back meanwhile in arrival order.
    pub fn finish_initial_load(&mut self) -> Vec<MessageRecord> {
        self.history_pending = false;
        let queued = std::mem::take(&mut self.queued_live);
        queued.into_iter().filter_map(|r| self.admit(r)).collect()
    }

    /// Offer a record pushed on the live channel.
    ///
    /// Returns the record if it is accepted now. While the initial load is
    /// pending the record is queued and `None` is returned.
    pub fn accept_live(&mut self, record: MessageRecord) -> Option<MessageRecord> {
        if self.history_pending {
            tracing::debug!(source = %record.source, "live record held until history loads");
            self.queued_live.push(record);
            return None;
        }
        self.admit(record)
    }

    /// Offer the optimistic echo of a local send. Never held back.
    pub fn accept_local(&mut self, record: MessageRecord) -> Option<MessageRecord> {
        self.admit(record)
    }

    /// Filter an older page (ascending) for prepending to the view.
    ///
    /// Adjacent duplicates inside the page are dropped. The longest run of
    /// newest records that repeats the head of the view is cut, and so is a
    /// newest record identical to the current oldest one. The live slot is
    /// not touched.
    pub fn accept_older(&mut self, page: Vec<MessageRecord>) -> Vec<MessageRecord> {
        let mut kept: Vec<MessageRecord> = Vec::with_capacity(page.len());
        for record in page {
            if kept.last().is_some_and(|prev| prev.key().matches(&record)) {
                continue;
            }
            kept.push(record);
        }

        let overlap = self.head_overlap(&kept);
        if overlap > 0 {
            tracing::debug!(overlap, "older page overlaps the view");
            kept.truncate(kept.len() - overlap);
        }
        let repeats_oldest = match (self.head.front(), kept.last()) {
            (Some(oldest), Some(newest)) => oldest.matches(newest),
            _ => false,
        };
        if repeats_oldest {
            kept.pop();
        }

        for record in kept.iter().rev() {
            self.head.push_front(record.key());
        }
        self.head.truncate(HEAD_WINDOW);
        kept
    }

    /// Length of the longest suffix of `page` equal to a prefix of the head.
    fn head_overlap(&self, page: &[MessageRecord]) -> usize {
        (1..=page.len().min(self.head.len()))
            .rev()
            .find(|&n| {
                page[page.len() - n..]
                    .iter()
                    .zip(self.head.iter())
                    .all(|(record, key)| key.matches(record))
            })
            .unwrap_or(0)
    }

    fn admit(&mut self, record: MessageRecord) -> Option<MessageRecord> {
        if self.last_accepted.as_ref().is_some_and(|k| k.matches(&record)) {
            tracing::debug!(source = %record.source, "duplicate record suppressed");
            return None;
        }
        let key = record.key();
        if self.head.len() < HEAD_WINDOW {
            self.head.push_back(key.clone());
        }
        self.last_accepted = Some(key);
        Some(record)
    }
}
