//! Mesh node roster entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::message::WireTimestamp;

/// Liveness of a mesh node as reported by the gateway or derived locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Heard from within the liveness window.
    #[serde(alias = "ONLINE", alias = "Online")]
    Online,
    /// Not heard from within the liveness window.
    #[serde(alias = "OFFLINE", alias = "Offline")]
    Offline,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// One entry of `GET /nodes` and of a `nodes_update` push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node identifier, the same value that appears as a message `source`.
    pub id: String,
    /// Last received signal strength in dBm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f64>,
    /// Last signal-to-noise ratio in dB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snr: Option<f64>,
    /// Last time the node was heard, in whole epoch seconds.
    ///
    /// Accepted on the wire as integer or fractional seconds or as an
    /// RFC 3339 string; fractions are dropped.
    #[serde(deserialize_with = "epoch_seconds")]
    pub last_seen: i64,
    /// Gateway-reported status.
    pub status: NodeStatus,
}

impl NodeInfo {
    /// `last_seen` as a date-time; out-of-range values clamp to the epoch.
    #[must_use]
    pub fn last_seen_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_seen, 0).unwrap_or_default()
    }
}

fn epoch_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = WireTimestamp::deserialize(deserializer)?;
    raw.to_datetime()
        .map(|at| at.timestamp())
        .ok_or_else(|| serde::de::Error::custom(format!("invalid last_seen: {raw:?}")))
}
