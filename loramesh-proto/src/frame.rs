//! Request/response bodies of the gateway HTTP API and live channel frames.

use serde::{Deserialize, Serialize};

use crate::message::{MessageRecord, WireMessage};
use crate::node::NodeInfo;

/// `type` tag of a roster push on the live channel.
pub const NODES_UPDATE: &str = "nodes_update";

/// Body of `GET /messages`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagesPage {
    /// One page of messages.
    #[serde(default)]
    pub messages: Vec<WireMessage>,
}

/// Body of `GET /nodes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodesPage {
    /// Every node the gateway knows about.
    #[serde(default)]
    pub nodes: Vec<NodeInfo>,
}

/// Body of `POST /publish`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Text to broadcast into the mesh.
    pub message: String,
}

/// Roster push as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct NodesUpdate {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) nodes: Vec<NodeInfo>,
}

/// A decoded live channel frame.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveFrame {
    /// A message pushed by the gateway.
    Message(MessageRecord),
    /// A full or partial roster push.
    NodesUpdate(Vec<NodeInfo>),
}
