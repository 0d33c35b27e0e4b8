//! Paged loading of past messages.
//!
//! The gateway pages from the newest record backwards: `offset = 0` is the
//! most recent `limit` records, and each older page is requested with an
//! offset equal to the number of records already loaded. Records the
//! gateway logs after the initial page shift those offsets, so every live
//! record counts towards the cursor too. [`HistoryLoader`] tracks that
//! cursor; [`load_page`] performs one fetch and normalizes the page to
//! oldest-first.

use loramesh_proto::message::MessageRecord;

use crate::api::{GatewayApi, TransportError};

/// One page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum number of records.
    pub limit: usize,
    /// Number of newest records to skip.
    pub offset: usize,
}

/// Backward-paging cursor.
#[derive(Debug, Clone)]
pub struct HistoryLoader {
    page_size: usize,
    loaded: usize,
    exhausted: bool,
    in_flight: bool,
    initial_pending: bool,
}

impl HistoryLoader {
    /// A cursor that has loaded nothing. A zero page size is raised to 1.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            loaded: 0,
            exhausted: false,
            in_flight: false,
            initial_pending: false,
        }
    }

    /// Records loaded so far; also the offset of the next older page.
    #[must_use]
    pub const fn loaded(&self) -> usize {
        self.loaded
    }

    /// Whether the gateway has no older records left.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Whether a request is outstanding.
    #[must_use]
    pub const fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// The initial request: the newest page.
    pub const fn initial_request(&mut self) -> PageRequest {
        self.in_flight = true;
        self.initial_pending = true;
        PageRequest {
            limit: self.page_size,
            offset: 0,
        }
    }

    /// The next older page, or `None` if history is exhausted or a request
    /// is already outstanding.
    pub const fn older_request(&mut self) -> Option<PageRequest> {
        if self.exhausted || self.in_flight {
            return None;
        }
        self.in_flight = true;
        Some(PageRequest {
            limit: self.page_size,
            offset: self.loaded,
        })
    }

    /// Count a record the gateway pushed on the live channel.
    ///
    /// While the initial page is outstanding the record may or may not be
    /// part of it, so it is not counted; an undercount only makes the next
    /// older page overlap the view, which the reconciler trims.
    pub const fn note_live_record(&mut self) {
        if !self.initial_pending {
            self.loaded += 1;
        }
    }

    /// Record the outcome of `request`: `page_len` records came back.
    ///
    /// A page shorter than the limit means nothing older exists.
    pub const fn complete(&mut self, request: PageRequest, page_len: usize) {
        self.in_flight = false;
        self.initial_pending = false;
        self.loaded += page_len;
        if page_len < request.limit {
            self.exhausted = true;
        }
    }

    /// Record a failed request; the same page may be requested again.
    pub const fn fail(&mut self) {
        self.in_flight = false;
        self.initial_pending = false;
    }
}

/// Fetch one page and return it oldest-first.
///
/// Pages are reversed when the first record is newer than the last, since
/// gateways differ in the order they return.
///
/// # Errors
///
/// Returns [`TransportError`] from the API unchanged; nothing is retried.
pub async fn load_page<A: GatewayApi>(
    api: &A,
    request: PageRequest,
) -> Result<Vec<MessageRecord>, TransportError> {
    let mut page = api.fetch_messages(request.limit, request.offset).await?;
    normalize(&mut page);
    Ok(page)
}

fn normalize(page: &mut [MessageRecord]) {
    let newest_first = matches!(
        (page.first(), page.last()),
        (Some(first), Some(last)) if first.sent_at > last.sent_at
    );
    if newest_first {
        page.reverse();
    }
}
