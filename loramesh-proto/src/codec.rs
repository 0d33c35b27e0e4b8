//! JSON encoding and decoding of live channel frames.
//!
//! The live channel carries one JSON object per frame: either a message
//! (`{source, payload, timestamp?, rssi?, snr?}`) or a roster push tagged
//! `{"type": "nodes_update", ...}`. Anything else is a [`ParseError`].

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::frame::{LiveFrame, NODES_UPDATE, NodesUpdate};
use crate::message::WireMessage;

/// `type` tag some gateways put on plain message frames.
const MESSAGE_TYPE: &str = "message";

/// Error type for frame decoding.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The frame is not JSON or does not have the expected shape.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame carries a `type` tag this client does not understand.
    #[error("unknown frame type: {0}")]
    UnknownType(String),
    /// A binary frame that is not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    NotUtf8,
}

/// Decodes one live channel frame.
///
/// `received_at` stamps message frames that carry no timestamp.
///
/// # Errors
///
/// Returns [`ParseError`] if the text is not a JSON object of a known frame
/// shape.
pub fn decode_frame(text: &str, received_at: DateTime<Utc>) -> Result<LiveFrame, ParseError> {
    let value: Value = serde_json::from_str(text)?;
    match value.get("type").and_then(Value::as_str) {
        Some(NODES_UPDATE) => {
            let push: NodesUpdate = serde_json::from_value(value)?;
            Ok(LiveFrame::NodesUpdate(push.nodes))
        }
        Some(other) if other != MESSAGE_TYPE => Err(ParseError::UnknownType(other.to_string())),
        _ => {
            let wire: WireMessage = serde_json::from_value(value)?;
            Ok(LiveFrame::Message(wire.into_record(received_at)))
        }
    }
}

/// Decodes a binary frame by first validating it as UTF-8.
///
/// # Errors
///
/// Returns [`ParseError::NotUtf8`] for invalid UTF-8, otherwise as
/// [`decode_frame`].
pub fn decode_binary_frame(
    bytes: &[u8],
    received_at: DateTime<Utc>,
) -> Result<LiveFrame, ParseError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;
    decode_frame(text, received_at)
}

/// Encodes a live frame as JSON text.
///
/// # Errors
///
/// Returns [`ParseError::Json`] if serialization fails (non-finite
/// telemetry values cannot be represented in JSON).
pub fn encode_frame(frame: &LiveFrame) -> Result<String, ParseError> {
    let text = match frame {
        LiveFrame::Message(record) => serde_json::to_string(&WireMessage::from(record))?,
        LiveFrame::NodesUpdate(nodes) => serde_json::to_string(&NodesUpdate {
            kind: NODES_UPDATE.to_string(),
            nodes: nodes.clone(),
        })?,
    };
    Ok(text)
}
