//! Peer liveness table.
//!
//! Every message from a remote node counts as a sighting of that node. A
//! sighting marks the node online and (re)arms its expiry timer for
//! `node_timeout` after the sighting time; a node that is not seen again
//! before the timer fires goes offline. Roster pushes from the gateway
//! apply the same upsert with the status and timestamp they carry.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};

use loramesh_proto::message::{MessageRecord, Telemetry, is_peer_source};
use loramesh_proto::node::{NodeInfo, NodeStatus};

use crate::schedule::{Scheduler, TaskHandle};

/// Known state of one remote node.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    /// Node id (the `source` of its messages).
    pub id: String,
    /// Last reported RSSI in dBm.
    pub rssi: Option<f64>,
    /// Last reported SNR in dB.
    pub snr: Option<f64>,
    /// Most recent sighting.
    pub last_seen: DateTime<Utc>,
    /// Online until the liveness timeout elapses without a new sighting.
    pub status: NodeStatus,
}

/// Fired by a peer's expiry timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerExpiry {
    /// Peer the timer was armed for.
    pub peer_id: String,
    /// The sighting that armed it.
    pub seen_at: DateTime<Utc>,
}

/// Peer table with debounced expiry.
pub struct PeerTracker<E> {
    scheduler: Scheduler<E>,
    node_timeout: Duration,
    peers: BTreeMap<String, PeerRecord>,
    expiries: HashMap<String, TaskHandle>,
}

impl<E> PeerTracker<E>
where
    E: From<PeerExpiry> + Send + 'static,
{
    /// An empty table whose timers report through `scheduler`.
    pub fn new(scheduler: Scheduler<E>, node_timeout: Duration) -> Self {
        Self {
            scheduler,
            node_timeout,
            peers: BTreeMap::new(),
            expiries: HashMap::new(),
        }
    }

    /// Record a sighting of `peer_id`.
    ///
    /// Returns the updated record, or `None` if the id is not a trackable
    /// peer or the sighting is older than the one already recorded.
    /// Telemetry fields that are absent keep their previous values.
    pub fn observe(
        &mut self,
        peer_id: &str,
        telemetry: Telemetry,
        seen_at: DateTime<Utc>,
    ) -> Option<PeerRecord> {
        let record = self.upsert(peer_id, telemetry, seen_at, NodeStatus::Online)?;
        self.arm_expiry(peer_id, seen_at);
        Some(record)
    }

    /// Record the sender of `record` as seen at its send time.
    pub fn observe_record(&mut self, record: &MessageRecord) -> Option<PeerRecord> {
        let peer_id = record.peer_id()?;
        self.observe(peer_id, record.telemetry, record.sent_at)
    }

    /// Apply a roster push. Peers listed offline are recorded offline and
    /// get no expiry timer.
    ///
    /// Returns the records that changed.
    pub fn apply_roster(&mut self, nodes: &[NodeInfo]) -> Vec<PeerRecord> {
        let mut changed = Vec::with_capacity(nodes.len());
        for node in nodes {
            let seen_at = node.last_seen_at();
            let telemetry = Telemetry {
                rssi: node.rssi,
                snr: node.snr,
            };
            let Some(record) = self.upsert(&node.id, telemetry, seen_at, node.status) else {
                continue;
            };
            match node.status {
                NodeStatus::Online => self.arm_expiry(&node.id, seen_at),
                NodeStatus::Offline => {
                    if let Some(timer) = self.expiries.remove(&node.id) {
                        timer.cancel();
                    }
                }
            }
            changed.push(record);
        }
        tracing::debug!(listed = nodes.len(), changed = changed.len(), "roster applied");
        changed
    }

    /// Handle a fired expiry timer.
    ///
    /// The peer goes offline only if nothing newer was seen since the
    /// sighting that armed the timer. Returns the record if it changed.
    pub fn expire(&mut self, expiry: &PeerExpiry) -> Option<PeerRecord> {
        let peer = self.peers.get_mut(&expiry.peer_id)?;
        if peer.last_seen != expiry.seen_at || peer.status == NodeStatus::Offline {
            return None;
        }
        peer.status = NodeStatus::Offline;
        self.expiries.remove(&expiry.peer_id);
        tracing::info!(peer = %expiry.peer_id, "peer went offline");
        Some(peer.clone())
    }

    /// Look up one peer.
    #[must_use]
    pub fn get(&self, peer_id: &str) -> Option<&PeerRecord> {
        self.peers.get(peer_id)
    }

    fn upsert(
        &mut self,
        peer_id: &str,
        telemetry: Telemetry,
        seen_at: DateTime<Utc>,
        status: NodeStatus,
    ) -> Option<PeerRecord> {
        if !is_peer_source(peer_id) {
            return None;
        }
        let peer = self
            .peers
            .entry(peer_id.to_string())
            .or_insert_with(|| PeerRecord {
                id: peer_id.to_string(),
                rssi: None,
                snr: None,
                last_seen: seen_at,
                status,
            });
        if seen_at < peer.last_seen {
            tracing::debug!(peer = %peer_id, "stale sighting ignored");
            return None;
        }
        if peer.status != status {
            tracing::info!(peer = %peer_id, %status, "peer status changed");
        }
        peer.last_seen = seen_at;
        peer.status = status;
        if telemetry.rssi.is_some() {
            peer.rssi = telemetry.rssi;
        }
        if telemetry.snr.is_some() {
            peer.snr = telemetry.snr;
        }
        Some(peer.clone())
    }

    /// Arm `node_timeout` from `seen_at`, replacing the peer's pending timer.
    fn arm_expiry(&mut self, peer_id: &str, seen_at: DateTime<Utc>) {
        let age = (Utc::now() - seen_at).to_std().unwrap_or_default();
        let delay = self.node_timeout.saturating_sub(age);
        let timer = self.scheduler.schedule(
            delay,
            PeerExpiry {
                peer_id: peer_id.to_string(),
                seen_at,
            },
        );
        if let Some(previous) = self.expiries.insert(peer_id.to_string(), timer) {
            previous.cancel();
        }
    }
}
