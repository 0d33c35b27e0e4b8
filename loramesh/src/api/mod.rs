//! Request/response access to the gateway's HTTP API.
//!
//! Defines the [`GatewayApi`] trait the session uses for everything that is
//! not the live channel: history pages, the node roster, and outbound
//! publishing. Implementations:
//! - [`http::HttpApi`]: reqwest client against a real gateway
//! - [`memory::MemoryApi`]: in-process fake for tests

pub mod http;
pub mod memory;

use std::future::Future;

use loramesh_proto::message::MessageRecord;
use loramesh_proto::node::NodeInfo;

/// A history or roster fetch failed.
///
/// Surfaced to the caller; fetches are never retried internally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or no response arrived.
    #[error("request failed: {0}")]
    Request(String),

    /// The gateway answered with a non-success status.
    #[error("gateway returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The response body was not the expected JSON shape.
    #[error("undecodable response: {0}")]
    Decode(String),
}

/// An outbound publish failed.
///
/// The optimistic local record stays visible; the failure is only reported.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendFailure {
    /// The request could not be sent or no response arrived.
    #[error("publish request failed: {0}")]
    Request(String),

    /// The gateway rejected the publish.
    #[error("publish rejected with HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },
}

/// Async access to the gateway's request/response endpoints.
///
/// # Paging
///
/// [`fetch_messages`](GatewayApi::fetch_messages) with `offset = 0` returns
/// the most recent `limit` records; a larger offset skips that many of the
/// newest records and returns the next older window. Implementations may
/// return a page in either order; callers normalize it.
pub trait GatewayApi: Send + Sync + 'static {
    /// `GET /messages?limit=N&offset=M`.
    fn fetch_messages(
        &self,
        limit: usize,
        offset: usize,
    ) -> impl Future<Output = Result<Vec<MessageRecord>, TransportError>> + Send;

    /// `GET /nodes`.
    fn fetch_nodes(&self) -> impl Future<Output = Result<Vec<NodeInfo>, TransportError>> + Send;

    /// `POST /publish`. Fire-and-forget: success means the gateway accepted
    /// the request, not that any node received it.
    fn publish(&self, message: &str) -> impl Future<Output = Result<(), SendFailure>> + Send;
}
