//! Line-oriented console front-end helpers.
//!
//! Parses what the user typed into [`Input`]s and renders session events as
//! single lines. The binary owns stdin/stdout; everything here is pure so it
//! can be tested without a terminal.

use std::fmt::Display;

use chrono::{DateTime, TimeZone, Utc};

use loramesh_proto::message::{MessageRecord, Telemetry};

use crate::peers::PeerRecord;
use crate::session::SessionEvent;

/// Label shown instead of the sender for locally sent messages.
pub const LOCAL_LABEL: &str = "Yo";

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Text to publish.
    Send(String),
    /// `/older`: load the previous history page.
    Older,
    /// `/peers`: print the peer table.
    Peers,
    /// `/quit`: end the session.
    Quit,
    /// A `/command` that does not exist.
    Unknown(String),
}

/// Parse one input line. Blank lines yield `None`.
#[must_use]
pub fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let input = match line {
        "/older" => Input::Older,
        "/peers" => Input::Peers,
        "/quit" | "/exit" => Input::Quit,
        cmd if cmd.starts_with('/') => Input::Unknown(cmd.to_string()),
        text => Input::Send(text.to_string()),
    };
    Some(input)
}

fn telemetry_suffix(telemetry: &Telemetry) -> String {
    match (telemetry.rssi, telemetry.snr) {
        (Some(rssi), Some(snr)) => format!(" (RSSI {rssi} dBm, SNR {snr} dB)"),
        (Some(rssi), None) => format!(" (RSSI {rssi} dBm)"),
        (None, Some(snr)) => format!(" (SNR {snr} dB)"),
        (None, None) => String::new(),
    }
}

fn clock<Tz>(at: DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    at.with_timezone(tz).format("%H:%M").to_string()
}

/// Render a message as `[HH:MM] sender: text (telemetry)`.
#[must_use]
pub fn render_record<Tz>(record: &MessageRecord, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let sender = if record.is_local() {
        LOCAL_LABEL
    } else {
        record.source.as_str()
    };
    format!(
        "[{}] {sender}: {}{}",
        clock(record.sent_at, tz),
        record.payload,
        telemetry_suffix(&record.telemetry)
    )
}

/// Render a peer table row.
#[must_use]
pub fn render_peer<Tz>(peer: &PeerRecord, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let telemetry = Telemetry {
        rssi: peer.rssi,
        snr: peer.snr,
    };
    format!(
        "{} {} (last seen {}){}",
        peer.id,
        peer.status,
        clock(peer.last_seen, tz),
        telemetry_suffix(&telemetry)
    )
}

/// Render a session event as the lines to print. Peer updates produce no
/// output; the binary keeps them for `/peers`.
#[must_use]
pub fn render_event<Tz>(event: &SessionEvent, tz: &Tz) -> Vec<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    match event {
        SessionEvent::MessageAccepted { record, .. } => vec![render_record(record, tz)],
        SessionEvent::HistoryPrepended { records } => {
            let mut lines = vec![format!("-- {} older messages --", records.len())];
            lines.extend(records.iter().map(|r| render_record(r, tz)));
            lines
        }
        SessionEvent::HistoryExhausted => vec!["-- no older messages --".to_string()],
        SessionEvent::HistoryFailed { reason } => {
            vec![format!("! could not load history: {reason}")]
        }
        SessionEvent::ConnectionChanged { state } => vec![format!("* connection {state}")],
        SessionEvent::ReconnectScheduled { attempt, delay } => vec![format!(
            "* reconnecting in {:.1}s (attempt {attempt})",
            delay.as_secs_f64()
        )],
        SessionEvent::PeerUpdated(_) => Vec::new(),
        SessionEvent::RosterFailed { reason } => {
            vec![format!("! could not load node list: {reason}")]
        }
        SessionEvent::SendFailed {
            payload, reason, ..
        } => vec![format!("! send failed ({reason}): {payload}")],
    }
}
