//! Message records and their identity.
//!
//! A [`MessageRecord`] is one entry of the gateway's append-only stream. The
//! remote source assigns no identifier, so duplicate suppression works on a
//! derived [`RecordKey`]: the `(source, payload)` pair. Timestamps and radio
//! telemetry never take part in identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source marker the gateway uses for messages published by this client.
pub const LOCAL_SOURCE: &str = "sent";

/// Placeholder source for frames that arrive without a sender.
pub const UNKNOWN_SOURCE: &str = "?";

/// Radio link quality reported alongside a received packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Received signal strength in dBm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f64>,
    /// Signal-to-noise ratio in dB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snr: Option<f64>,
}

/// One message of the stream, immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    /// Sender node id, [`LOCAL_SOURCE`], or [`UNKNOWN_SOURCE`].
    pub source: String,
    /// Message text.
    pub payload: String,
    /// When the message was sent (or first seen, if the wire omitted it).
    pub sent_at: DateTime<Utc>,
    /// Optional link quality of the packet that carried the message.
    pub telemetry: Telemetry,
}

impl MessageRecord {
    /// Build a record with no telemetry.
    pub fn new(
        source: impl Into<String>,
        payload: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source: source.into(),
            payload: payload.into(),
            sent_at,
            telemetry: Telemetry::default(),
        }
    }

    /// Build the optimistic echo of a locally submitted message.
    pub fn local(payload: impl Into<String>, sent_at: DateTime<Utc>) -> Self {
        Self::new(LOCAL_SOURCE, payload, sent_at)
    }

    /// Attach telemetry to the record.
    #[must_use]
    pub const fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Dedup key of this record.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey {
            source: self.source.clone(),
            payload: self.payload.clone(),
        }
    }

    /// Whether this record was produced by the local client.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.source == LOCAL_SOURCE
    }

    /// The peer this record should be attributed to, if any.
    ///
    /// Local echoes, unknown senders and empty sources are not peers.
    #[must_use]
    pub fn peer_id(&self) -> Option<&str> {
        is_peer_source(&self.source).then_some(self.source.as_str())
    }
}

/// Returns `true` if `source` names a remote node that should be tracked.
#[must_use]
pub fn is_peer_source(source: &str) -> bool {
    !source.is_empty() && source != LOCAL_SOURCE && source != UNKNOWN_SOURCE
}

/// Identity of a record for duplicate suppression: `(source, payload)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    source: String,
    payload: String,
}

impl RecordKey {
    /// Returns `true` if `record` has this identity.
    #[must_use]
    pub fn matches(&self, record: &MessageRecord) -> bool {
        self.source == record.source && self.payload == record.payload
    }

    /// Sender part of the key.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Payload part of the key.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }
}

/// Timestamp as it may appear on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    /// Seconds since the Unix epoch, possibly fractional.
    Seconds(f64),
    /// RFC 3339 date-time string.
    Text(String),
}

impl WireTimestamp {
    /// Convert to a UTC date-time, or `None` if out of range or unparsable.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Seconds(secs) => {
                if !secs.is_finite() {
                    return None;
                }
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9) as u32;
                DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
            }
            Self::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

impl From<DateTime<Utc>> for WireTimestamp {
    #[allow(clippy::cast_precision_loss)]
    fn from(dt: DateTime<Utc>) -> Self {
        Self::Seconds(dt.timestamp_millis() as f64 / 1000.0)
    }
}

/// A message as carried by `GET /messages` and by live frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Sender; absent on some gateways' frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Message text.
    pub payload: String,
    /// Send time, if the gateway recorded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<WireTimestamp>,
    /// Received signal strength in dBm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f64>,
    /// Signal-to-noise ratio in dB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snr: Option<f64>,
}

impl WireMessage {
    /// Convert into a [`MessageRecord`].
    ///
    /// A missing source becomes [`UNKNOWN_SOURCE`]; a missing or unreadable
    /// timestamp becomes `received_at`.
    #[must_use]
    pub fn into_record(self, received_at: DateTime<Utc>) -> MessageRecord {
        let sent_at = self
            .timestamp
            .as_ref()
            .and_then(WireTimestamp::to_datetime)
            .unwrap_or(received_at);
        MessageRecord {
            source: self
                .source
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| UNKNOWN_SOURCE.to_string()),
            payload: self.payload,
            sent_at,
            telemetry: Telemetry {
                rssi: self.rssi,
                snr: self.snr,
            },
        }
    }
}

impl From<&MessageRecord> for WireMessage {
    fn from(record: &MessageRecord) -> Self {
        Self {
            source: Some(record.source.clone()),
            payload: record.payload.clone(),
            timestamp: Some(record.sent_at.into()),
            rssi: record.telemetry.rssi,
            snr: record.telemetry.snr,
        }
    }
}
