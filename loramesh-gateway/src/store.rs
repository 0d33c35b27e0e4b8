//! In-memory message log served by `GET /messages`.
//!
//! The [`MessageLog`] keeps records in arrival order and evicts the oldest
//! once the configured cap is exceeded. Pages are counted back from the
//! newest record, so `offset = 0` always returns the most recent window.

use std::collections::VecDeque;

use loramesh_proto::message::MessageRecord;
use tokio::sync::RwLock;

/// Default number of records kept before eviction.
pub const DEFAULT_HISTORY_CAP: usize = 1000;

/// Append-only, capped message log.
pub struct MessageLog {
    records: RwLock<VecDeque<MessageRecord>>,
    cap: usize,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    /// An empty log with the default cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_HISTORY_CAP)
    }

    /// An empty log holding at most `cap` records (minimum 1).
    #[must_use]
    pub fn with_cap(cap: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            cap: cap.max(1),
        }
    }

    /// Appends a record, returning the new log length.
    pub async fn append(&self, record: MessageRecord) -> usize {
        let mut records = self.records.write().await;
        records.push_back(record);
        while records.len() > self.cap {
            records.pop_front();
        }
        records.len()
    }

    /// Returns up to `limit` records ending `offset` records before the
    /// newest one, oldest first.
    pub async fn page(&self, limit: usize, offset: usize) -> Vec<MessageRecord> {
        let records = self.records.read().await;
        let end = records.len().saturating_sub(offset);
        let start = end.saturating_sub(limit);
        records.range(start..end).cloned().collect()
    }

    /// Number of records currently held.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns `true` if nothing has been logged.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
