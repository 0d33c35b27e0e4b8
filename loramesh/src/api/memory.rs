//! In-process gateway for testing.
//!
//! [`MemoryApi`] keeps the message log and node roster in memory and answers
//! [`GatewayApi`] calls the way a gateway would: pages are windows counted
//! back from the newest record, and a successful publish appends a
//! [`LOCAL_SOURCE`] record to the log. Failures, page ordering and request
//! latency can be scripted per test.

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;

use loramesh_proto::message::{LOCAL_SOURCE, MessageRecord};
use loramesh_proto::node::NodeInfo;

use super::{GatewayApi, SendFailure, TransportError};

#[derive(Debug, Default)]
struct State {
    /// Message log, oldest first.
    messages: Vec<MessageRecord>,
    nodes: Vec<NodeInfo>,
    published: Vec<String>,
    history_requests: Vec<(usize, usize)>,
    history_failure: Option<TransportError>,
    nodes_failure: Option<TransportError>,
    publish_failure: Option<SendFailure>,
    newest_first: bool,
}

/// Scriptable in-memory gateway.
///
/// ```rust,no_run
/// use loramesh::api::GatewayApi;
/// use loramesh::api::memory::MemoryApi;
///
/// # async fn example() {
/// let api = MemoryApi::new();
/// api.publish("hello").await.unwrap();
/// assert_eq!(api.published(), vec!["hello".to_string()]);
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryApi {
    state: Mutex<State>,
    /// `true` while history requests may complete.
    history_gate: watch::Sender<bool>,
}

impl Default for MemoryApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryApi {
    /// An empty gateway that answers immediately.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            history_gate: watch::Sender::new(true),
        }
    }

    /// A gateway whose log already holds `messages`, oldest first.
    #[must_use]
    pub fn with_messages(messages: impl IntoIterator<Item = MessageRecord>) -> Self {
        let api = Self::new();
        api.state.lock().messages.extend(messages);
        api
    }

    /// Append a record to the log.
    pub fn push_message(&self, record: MessageRecord) {
        self.state.lock().messages.push(record);
    }

    /// Replace the roster served by `GET /nodes`.
    pub fn set_nodes(&self, nodes: Vec<NodeInfo>) {
        self.state.lock().nodes = nodes;
    }

    /// Serve pages newest first instead of oldest first.
    pub fn serve_newest_first(&self, newest_first: bool) {
        self.state.lock().newest_first = newest_first;
    }

    /// Make every history request fail with `error` (or succeed again on `None`).
    pub fn fail_history(&self, error: Option<TransportError>) {
        self.state.lock().history_failure = error;
    }

    /// Make every roster request fail with `error` (or succeed again on `None`).
    pub fn fail_nodes(&self, error: Option<TransportError>) {
        self.state.lock().nodes_failure = error;
    }

    /// Make every publish fail with `error` (or succeed again on `None`).
    pub fn fail_publish(&self, error: Option<SendFailure>) {
        self.state.lock().publish_failure = error;
    }

    /// Park history requests until [`release_history`](Self::release_history).
    pub fn hold_history(&self) {
        self.history_gate.send_replace(false);
    }

    /// Let parked and future history requests complete.
    pub fn release_history(&self) {
        self.history_gate.send_replace(true);
    }

    /// Every message successfully published, in order.
    #[must_use]
    pub fn published(&self) -> Vec<String> {
        self.state.lock().published.clone()
    }

    /// `(limit, offset)` of every history request received, in order.
    #[must_use]
    pub fn history_requests(&self) -> Vec<(usize, usize)> {
        self.state.lock().history_requests.clone()
    }
}

impl GatewayApi for MemoryApi {
    async fn fetch_messages(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MessageRecord>, TransportError> {
        self.state.lock().history_requests.push((limit, offset));

        let mut gate = self.history_gate.subscribe();
        // The sender lives in `self`, so the gate cannot close under us.
        let _ = gate.wait_for(|open| *open).await;

        let state = self.state.lock();
        if let Some(error) = &state.history_failure {
            return Err(error.clone());
        }
        let end = state.messages.len().saturating_sub(offset);
        let start = end.saturating_sub(limit);
        let mut page = state.messages[start..end].to_vec();
        if state.newest_first {
            page.reverse();
        }
        Ok(page)
    }

    async fn fetch_nodes(&self) -> Result<Vec<NodeInfo>, TransportError> {
        let state = self.state.lock();
        match &state.nodes_failure {
            Some(error) => Err(error.clone()),
            None => Ok(state.nodes.clone()),
        }
    }

    async fn publish(&self, message: &str) -> Result<(), SendFailure> {
        let mut state = self.state.lock();
        if let Some(error) = &state.publish_failure {
            return Err(error.clone());
        }
        state.published.push(message.to_string());
        state
            .messages
            .push(MessageRecord::new(LOCAL_SOURCE, message, Utc::now()));
        Ok(())
    }
}
