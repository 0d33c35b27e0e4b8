// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for the merged message stream.
//!
//! Drives a whole session against the in-memory gateway and scripted live
//! connections, checking what presentation sees:
//! - history records come before live records that arrived during the load
//! - the live echo of an already shown record is suppressed
//! - local sends appear at once, and a failed publish leaves them in place
//! - a failed initial load still lets live records through
//! - shutdown closes the live channel and ends the event stream
//!
//! Verification command: `cargo test --test session_stream`

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use url::Url;

use loramesh::api::memory::MemoryApi;
use loramesh::api::{SendFailure, TransportError};
use loramesh::live::ConnectionState;
use loramesh::live::memory::{MemoryLink, ScriptedConnector};
use loramesh::session::{
    RecordOrigin, SessionCommand, SessionConfig, SessionEvent, spawn_session,
};
use loramesh_proto::frame::LiveFrame;
use loramesh_proto::message::{LOCAL_SOURCE, MessageRecord};

// =============================================================================
// Test helpers
// =============================================================================

struct Harness {
    api: Arc<MemoryApi>,
    link: MemoryLink,
    commands: mpsc::Sender<SessionCommand>,
    events: mpsc::Receiver<SessionEvent>,
}

fn config() -> SessionConfig {
    SessionConfig::new(Url::parse("ws://gateway.test:8000/ws").unwrap())
}

fn record(source: &str, payload: &str) -> MessageRecord {
    MessageRecord::new(source, payload, Utc::now())
}

/// Starts a session whose first live connection opens immediately.
fn start(api: MemoryApi) -> Harness {
    let api = Arc::new(api);
    let connector = Arc::new(ScriptedConnector::new());
    let link = connector.accept();
    let (commands, events) = spawn_session(config(), Arc::clone(&api), connector);
    Harness {
        api,
        link,
        commands,
        events,
    }
}

async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("session event within 10s")
        .expect("session still running")
}

async fn wait_for(
    events: &mut mpsc::Receiver<SessionEvent>,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

async fn next_message(events: &mut mpsc::Receiver<SessionEvent>) -> (MessageRecord, RecordOrigin) {
    loop {
        if let SessionEvent::MessageAccepted { record, origin } = next_event(events).await {
            return (record, origin);
        }
    }
}

async fn wait_open(events: &mut mpsc::Receiver<SessionEvent>) {
    wait_for(events, |e| {
        matches!(
            e,
            SessionEvent::ConnectionChanged {
                state: ConnectionState::Open
            }
        )
    })
    .await;
}

async fn send(commands: &mpsc::Sender<SessionCommand>, text: &str) {
    commands
        .send(SessionCommand::Send {
            text: text.to_string(),
        })
        .await
        .unwrap();
}

// =============================================================================
// Ordering and duplicate suppression
// =============================================================================

#[tokio::test]
async fn history_precedes_live_records_received_during_load() {
    let api = MemoryApi::with_messages([record("node-1", "A"), record("node-1", "B")]);
    api.hold_history();
    let mut h = start(api);

    wait_open(&mut h.events).await;
    h.link.send_frame(&LiveFrame::Message(record("node-2", "C")));
    // The sighting is reported even while the record itself is held back.
    wait_for(&mut h.events, |e| {
        matches!(e, SessionEvent::PeerUpdated(peer) if peer.id == "node-2")
    })
    .await;
    h.api.release_history();

    let mut seen = Vec::new();
    for _ in 0..3 {
        let (record, origin) = next_message(&mut h.events).await;
        seen.push((record.payload, origin));
    }
    assert_eq!(
        seen,
        vec![
            ("A".to_string(), RecordOrigin::History),
            ("B".to_string(), RecordOrigin::History),
            ("C".to_string(), RecordOrigin::Live),
        ]
    );
}

#[tokio::test]
async fn live_echo_of_newest_history_record_is_suppressed() {
    let mut h = start(MemoryApi::with_messages([
        record("node-1", "A"),
        record("node-1", "B"),
    ]));

    assert_eq!(next_message(&mut h.events).await.0.payload, "A");
    assert_eq!(next_message(&mut h.events).await.0.payload, "B");

    // Frames queue on the link until the connection has opened.
    h.link.send_frame(&LiveFrame::Message(record("node-1", "B")));
    h.link.send_frame(&LiveFrame::Message(record("node-1", "C")));
    h.link.send_frame(&LiveFrame::Message(record("node-1", "B")));

    let (c, origin) = next_message(&mut h.events).await;
    assert_eq!((c.payload.as_str(), origin), ("C", RecordOrigin::Live));
    // Not adjacent to the first B any more, so it is kept.
    assert_eq!(next_message(&mut h.events).await.0.payload, "B");
}

#[tokio::test]
async fn malformed_frames_are_skipped_without_dropping_the_connection() {
    let mut h = start(MemoryApi::new());
    wait_open(&mut h.events).await;

    h.link.send_text("{\"payload\":");
    h.link.send_binary(vec![0xff, 0x00, 0x13]);
    h.link.send_frame(&LiveFrame::Message(record("node-4", "still here")));

    let event = wait_for(&mut h.events, |e| {
        matches!(
            e,
            SessionEvent::MessageAccepted { .. } | SessionEvent::ConnectionChanged { .. }
        )
    })
    .await;
    match event {
        SessionEvent::MessageAccepted { record, .. } => assert_eq!(record.payload, "still here"),
        other => panic!("connection state changed: {other:?}"),
    }
    assert!(h.link.is_connected());
}

// =============================================================================
// Local sends
// =============================================================================

#[tokio::test]
async fn local_send_is_shown_at_once_and_gateway_echo_suppressed() {
    let mut h = start(MemoryApi::new());
    wait_open(&mut h.events).await;

    send(&h.commands, "  hello  ").await;
    let (shown, origin) = next_message(&mut h.events).await;
    assert_eq!(shown.payload, "hello");
    assert_eq!(shown.source, LOCAL_SOURCE);
    assert!(matches!(origin, RecordOrigin::Local { .. }));

    h.link.send_frame(&LiveFrame::Message(shown));
    h.link.send_frame(&LiveFrame::Message(record("node-2", "reply")));
    assert_eq!(next_message(&mut h.events).await.0.payload, "reply");

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.api.published().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(h.api.published(), vec!["hello".to_string()]);
}

#[tokio::test]
async fn failed_publish_keeps_the_optimistic_record() {
    let api = MemoryApi::new();
    api.fail_publish(Some(SendFailure::Status { status: 503 }));
    let mut h = start(api);
    wait_open(&mut h.events).await;

    send(&h.commands, "hello").await;
    let (_, origin) = next_message(&mut h.events).await;
    let RecordOrigin::Local { send_id } = origin else {
        panic!("expected a local record, got {origin:?}");
    };

    let failed = wait_for(&mut h.events, |e| matches!(e, SessionEvent::SendFailed { .. })).await;
    assert_eq!(
        failed,
        SessionEvent::SendFailed {
            send_id,
            payload: "hello".to_string(),
            reason: SendFailure::Status { status: 503 },
        }
    );

    // Nothing was injected in the meantime: the next message is the live one.
    h.link.send_frame(&LiveFrame::Message(record("node-2", "after")));
    assert_eq!(next_message(&mut h.events).await.0.payload, "after");
    assert!(h.api.published().is_empty());
}

#[tokio::test]
async fn blank_text_is_not_sent() {
    let mut h = start(MemoryApi::new());
    wait_open(&mut h.events).await;

    send(&h.commands, "   ").await;
    send(&h.commands, "real").await;
    assert_eq!(next_message(&mut h.events).await.0.payload, "real");
}

// =============================================================================
// Failures and shutdown
// =============================================================================

#[tokio::test]
async fn failed_initial_load_releases_live_records() {
    let api = MemoryApi::new();
    api.fail_history(Some(TransportError::Status { status: 500 }));
    let mut h = start(api);

    let failed = wait_for(&mut h.events, |e| matches!(e, SessionEvent::HistoryFailed { .. })).await;
    assert_eq!(
        failed,
        SessionEvent::HistoryFailed {
            reason: TransportError::Status { status: 500 }
        }
    );

    h.link.send_frame(&LiveFrame::Message(record("node-1", "live")));
    let (record, origin) = next_message(&mut h.events).await;
    assert_eq!((record.payload.as_str(), origin), ("live", RecordOrigin::Live));
}

#[tokio::test]
async fn roster_failure_is_reported() {
    let api = MemoryApi::new();
    api.fail_nodes(Some(TransportError::Request("refused".into())));
    let mut h = start(api);

    let event = wait_for(&mut h.events, |e| matches!(e, SessionEvent::RosterFailed { .. })).await;
    assert_eq!(
        event,
        SessionEvent::RosterFailed {
            reason: TransportError::Request("refused".into())
        }
    );
}

#[tokio::test]
async fn shutdown_closes_the_live_channel() {
    let mut h = start(MemoryApi::new());
    wait_open(&mut h.events).await;

    h.commands.send(SessionCommand::Shutdown).await.unwrap();
    wait_for(&mut h.events, |e| {
        matches!(
            e,
            SessionEvent::ConnectionChanged {
                state: ConnectionState::Closed
            }
        )
    })
    .await;

    let end = tokio::time::timeout(Duration::from_secs(5), async {
        while h.events.recv().await.is_some() {}
    })
    .await;
    assert!(end.is_ok(), "event stream should end after shutdown");

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.link.is_connected() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
