//! Node roster served by `GET /nodes` and pushed as `nodes_update` frames.
//!
//! Entries are created when a record from a mesh node is ingested, or when
//! a roster is pushed explicitly. Entries live only as long as the process.

use std::collections::BTreeMap;

use loramesh_proto::message::MessageRecord;
use loramesh_proto::node::{NodeInfo, NodeStatus};
use tokio::sync::RwLock;

/// Maximum number of nodes the roster will hold.
const MAX_ROSTER_NODES: usize = 1000;

/// Errors raised by roster updates.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RosterError {
    /// The roster is full and the node is not already in it.
    #[error("node roster is full (max {MAX_ROSTER_NODES} nodes)")]
    CapacityReached,
    /// The node id is empty.
    #[error("node id must not be empty")]
    EmptyId,
}

/// In-memory node directory keyed by node id.
pub struct NodeRoster {
    nodes: RwLock<BTreeMap<String, NodeInfo>>,
}

impl Default for NodeRoster {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRoster {
    /// Creates an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Refreshes the sender's entry from an ingested record.
    ///
    /// Returns `Ok(None)` for records that are not attributable to a node
    /// (local sends, unknown senders). Telemetry absent from the record
    /// keeps the previous values.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError::CapacityReached`] for a new node on a full roster.
    pub async fn observe(&self, record: &MessageRecord) -> Result<Option<NodeInfo>, RosterError> {
        let Some(id) = record.peer_id() else {
            return Ok(None);
        };
        let mut nodes = self.nodes.write().await;
        if nodes.len() >= MAX_ROSTER_NODES && !nodes.contains_key(id) {
            return Err(RosterError::CapacityReached);
        }
        let entry = nodes.entry(id.to_string()).or_insert_with(|| NodeInfo {
            id: id.to_string(),
            rssi: None,
            snr: None,
            last_seen: record.sent_at.timestamp(),
            status: NodeStatus::Online,
        });
        entry.last_seen = entry.last_seen.max(record.sent_at.timestamp());
        entry.status = NodeStatus::Online;
        if let Some(rssi) = record.telemetry.rssi {
            entry.rssi = Some(rssi);
        }
        if let Some(snr) = record.telemetry.snr {
            entry.snr = Some(snr);
        }
        let updated = entry.clone();
        drop(nodes);
        Ok(Some(updated))
    }

    /// Inserts or replaces the given entries.
    ///
    /// # Errors
    ///
    /// Rejects the whole batch if any entry has an empty id or would
    /// overflow the roster; nothing is applied in that case.
    pub async fn upsert(&self, entries: &[NodeInfo]) -> Result<(), RosterError> {
        if entries.iter().any(|n| n.id.is_empty()) {
            return Err(RosterError::EmptyId);
        }
        let mut nodes = self.nodes.write().await;
        let added = entries
            .iter()
            .filter(|n| !nodes.contains_key(&n.id))
            .count();
        if nodes.len() + added > MAX_ROSTER_NODES {
            return Err(RosterError::CapacityReached);
        }
        for node in entries {
            nodes.insert(node.id.clone(), node.clone());
        }
        drop(nodes);
        Ok(())
    }

    /// Looks up one node.
    pub async fn get(&self, id: &str) -> Option<NodeInfo> {
        self.nodes.read().await.get(id).cloned()
    }

    /// All nodes, ordered by id.
    pub async fn snapshot(&self) -> Vec<NodeInfo> {
        self.nodes.read().await.values().cloned().collect()
    }
}
