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

//! Integration tests for peer liveness as seen through a session.
//!
//! All tests run on a paused clock. Sighting timestamps come from the wall
//! clock, which does not move while tokio time is advanced, so a sighting
//! made "now" arms its expiry a full timeout ahead.
//!
//! Verification command: `cargo test --test peer_liveness`

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use loramesh::api::memory::MemoryApi;
use loramesh::live::ConnectionState;
use loramesh::live::memory::{MemoryLink, ScriptedConnector};
use loramesh::peers::PeerRecord;
use loramesh::session::{SessionCommand, SessionConfig, SessionEvent, spawn_session};
use loramesh_proto::frame::LiveFrame;
use loramesh_proto::message::{LOCAL_SOURCE, MessageRecord, Telemetry, UNKNOWN_SOURCE};
use loramesh_proto::node::{NodeInfo, NodeStatus};

const NODE_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// Test helpers
// =============================================================================

fn start(
    api: MemoryApi,
) -> (
    MemoryLink,
    mpsc::Sender<SessionCommand>,
    mpsc::Receiver<SessionEvent>,
) {
    let connector = Arc::new(ScriptedConnector::new());
    let link = connector.accept();
    let mut config = SessionConfig::new(Url::parse("ws://gateway.test:8000/ws").unwrap());
    config.node_timeout = NODE_TIMEOUT;
    let (commands, events) = spawn_session(config, Arc::new(api), connector);
    (link, commands, events)
}

async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(600), events.recv())
        .await
        .expect("session event in time")
        .expect("session still running")
}

async fn next_peer(events: &mut mpsc::Receiver<SessionEvent>) -> PeerRecord {
    loop {
        if let SessionEvent::PeerUpdated(peer) = next_event(events).await {
            return peer;
        }
    }
}

async fn wait_open(events: &mut mpsc::Receiver<SessionEvent>) {
    loop {
        if next_event(events).await
            == (SessionEvent::ConnectionChanged {
                state: ConnectionState::Open,
            })
        {
            return;
        }
    }
}

fn sighting(source: &str, rssi: Option<f64>) -> LiveFrame {
    LiveFrame::Message(
        MessageRecord::new(source, "beacon", Utc::now()).with_telemetry(Telemetry {
            rssi,
            snr: None,
        }),
    )
}

// =============================================================================
// Expiry
// =============================================================================

#[tokio::test(start_paused = true)]
async fn unseen_peer_goes_offline_after_timeout() {
    let (link, _commands, mut events) = start(MemoryApi::new());
    wait_open(&mut events).await;

    link.send_frame(&sighting("node-1", Some(-92.0)));
    let online = next_peer(&mut events).await;
    assert_eq!(online.id, "node-1");
    assert_eq!(online.status, NodeStatus::Online);
    let seen = Instant::now();

    let offline = next_peer(&mut events).await;
    assert_eq!(offline.id, "node-1");
    assert_eq!(offline.status, NodeStatus::Offline);
    assert_eq!(offline.rssi, Some(-92.0));
    let waited = seen.elapsed();
    assert!(waited > Duration::from_secs(59), "expired early: {waited:?}");
    assert!(waited <= NODE_TIMEOUT, "expired late: {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn new_sighting_postpones_expiry() {
    let (link, _commands, mut events) = start(MemoryApi::new());
    wait_open(&mut events).await;

    link.send_frame(&sighting("node-1", Some(-92.0)));
    next_peer(&mut events).await;
    let first = Instant::now();

    tokio::time::sleep(Duration::from_secs(40)).await;
    link.send_frame(&sighting("node-1", None));
    let refreshed = next_peer(&mut events).await;
    assert_eq!(refreshed.status, NodeStatus::Online);
    assert_eq!(refreshed.rssi, Some(-92.0), "absent telemetry keeps the old value");

    let offline = next_peer(&mut events).await;
    assert_eq!(offline.status, NodeStatus::Offline);
    let waited = first.elapsed();
    assert!(waited > Duration::from_secs(99), "expired early: {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn history_sightings_arm_expiry_from_their_timestamp() {
    let sent_at = Utc::now() - chrono::Duration::seconds(45);
    let api = MemoryApi::with_messages([MessageRecord::new("node-3", "old news", sent_at)]);
    let (_link, _commands, mut events) = start(api);

    let online = next_peer(&mut events).await;
    assert_eq!((online.id.as_str(), online.status), ("node-3", NodeStatus::Online));
    let seen = Instant::now();

    let offline = next_peer(&mut events).await;
    assert_eq!((offline.id.as_str(), offline.status), ("node-3", NodeStatus::Offline));
    let waited = seen.elapsed();
    assert!(waited <= Duration::from_secs(15), "expired late: {waited:?}");
    assert!(waited > Duration::from_secs(14), "expired early: {waited:?}");
}

// =============================================================================
// Attribution and roster
// =============================================================================

#[tokio::test(start_paused = true)]
async fn local_and_unknown_senders_are_not_tracked() {
    let (link, _commands, mut events) = start(MemoryApi::new());
    wait_open(&mut events).await;

    link.send_frame(&sighting(LOCAL_SOURCE, Some(-50.0)));
    link.send_text(r#"{"payload":"who sent this"}"#);
    link.send_frame(&sighting("node-2", None));

    let peer = next_peer(&mut events).await;
    assert_eq!(peer.id, "node-2");
    assert_ne!(peer.id, UNKNOWN_SOURCE);
}

#[tokio::test(start_paused = true)]
async fn roster_entries_are_applied_with_their_status() {
    let now = Utc::now().timestamp();
    let api = MemoryApi::new();
    api.set_nodes(vec![
        NodeInfo {
            id: "node-5".into(),
            rssi: Some(-71.0),
            snr: Some(8.5),
            last_seen: now,
            status: NodeStatus::Online,
        },
        NodeInfo {
            id: "node-6".into(),
            rssi: None,
            snr: None,
            last_seen: now - 600,
            status: NodeStatus::Offline,
        },
    ]);
    let (_link, _commands, mut events) = start(api);

    let mut listed = vec![next_peer(&mut events).await, next_peer(&mut events).await];
    listed.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(listed[0].id, "node-5");
    assert_eq!(listed[0].status, NodeStatus::Online);
    assert_eq!(listed[0].snr, Some(8.5));
    assert_eq!(listed[1].id, "node-6");
    assert_eq!(listed[1].status, NodeStatus::Offline);

    // Only the online entry has a timer to fire.
    let expired = next_peer(&mut events).await;
    assert_eq!(
        (expired.id.as_str(), expired.status),
        ("node-5", NodeStatus::Offline)
    );
}

#[tokio::test(start_paused = true)]
async fn roster_push_marks_peer_offline_and_cancels_expiry() {
    let (link, _commands, mut events) = start(MemoryApi::new());
    wait_open(&mut events).await;

    link.send_frame(&sighting("node-7", None));
    next_peer(&mut events).await;

    link.send_frame(&LiveFrame::NodesUpdate(vec![NodeInfo {
        id: "node-7".into(),
        rssi: None,
        snr: None,
        last_seen: Utc::now().timestamp() + 1,
        status: NodeStatus::Offline,
    }]));
    let offline = next_peer(&mut events).await;
    assert_eq!(offline.status, NodeStatus::Offline);

    // No expiry fires later for the cancelled timer.
    let quiet = tokio::time::timeout(NODE_TIMEOUT * 2, next_peer(&mut events)).await;
    assert!(quiet.is_err());
}
