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

//! Integration tests for the gateway HTTP API and backward history paging.
//!
//! Runs the reqwest client and whole sessions against the in-process
//! reference gateway.
//!
//! Verification command: `cargo test --test history_paging`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use tokio::sync::mpsc;
use url::Url;

use loramesh::api::http::HttpApi;
use loramesh::api::{GatewayApi, SendFailure, TransportError};
use loramesh::live::{self, ws::WsConnector};
use loramesh::session::{RecordOrigin, SessionCommand, SessionConfig, SessionEvent, spawn_session};
use loramesh_gateway::gateway::{self, GatewayState};
use loramesh_proto::message::{LOCAL_SOURCE, MessageRecord, Telemetry};
use loramesh_proto::node::NodeStatus;

// =============================================================================
// Test helpers
// =============================================================================

fn numbered(n: i64) -> MessageRecord {
    MessageRecord::new(
        "node-1",
        format!("m{n}"),
        DateTime::from_timestamp(1_700_000_000 + n, 0).unwrap(),
    )
}

async fn start_gateway(records: impl IntoIterator<Item = MessageRecord>) -> (SocketAddr, Arc<GatewayState>) {
    let state = Arc::new(GatewayState::new());
    for record in records {
        state.ingest(record).await;
    }
    let (addr, _handle) = gateway::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (addr, state)
}

fn origin(addr: SocketAddr) -> Url {
    Url::parse(&format!("http://{addr}")).unwrap()
}

fn payloads(records: &[MessageRecord]) -> Vec<&str> {
    records.iter().map(|r| r.payload.as_str()).collect()
}

fn connect_session(
    addr: SocketAddr,
    page_size: usize,
) -> (mpsc::Sender<SessionCommand>, mpsc::Receiver<SessionEvent>) {
    let origin = origin(addr);
    let mut config = SessionConfig::new(live::live_url(&origin, addr.port(), "/ws").unwrap());
    config.page_size = page_size;
    let api = Arc::new(HttpApi::new(origin).unwrap());
    spawn_session(config, api, Arc::new(WsConnector))
}

async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("session event within 10s")
        .expect("session still running")
}

/// Skips connection and peer chatter.
async fn next_history_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    loop {
        let event = next_event(events).await;
        if !matches!(
            event,
            SessionEvent::ConnectionChanged { .. }
                | SessionEvent::ReconnectScheduled { .. }
                | SessionEvent::PeerUpdated(_)
        ) {
            return event;
        }
    }
}

async fn expect_accepted(events: &mut mpsc::Receiver<SessionEvent>, origin: RecordOrigin) -> String {
    match next_history_event(events).await {
        SessionEvent::MessageAccepted { record, origin: got } => {
            assert_eq!(got, origin, "origin of {}", record.payload);
            record.payload
        }
        other => panic!("expected an accepted message, got {other:?}"),
    }
}

async fn expect_prepended(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<String> {
    match next_history_event(events).await {
        SessionEvent::HistoryPrepended { records } => {
            records.into_iter().map(|r| r.payload).collect()
        }
        other => panic!("expected prepended history, got {other:?}"),
    }
}

// =============================================================================
// HTTP client against the reference gateway
// =============================================================================

#[tokio::test]
async fn pages_count_back_from_the_newest_record() {
    let (addr, _state) = start_gateway((1..=5).map(numbered)).await;
    let api = HttpApi::new(origin(addr)).unwrap();

    assert_eq!(payloads(&api.fetch_messages(2, 0).await.unwrap()), ["m4", "m5"]);
    assert_eq!(payloads(&api.fetch_messages(2, 2).await.unwrap()), ["m2", "m3"]);
    assert_eq!(payloads(&api.fetch_messages(2, 4).await.unwrap()), ["m1"]);
    assert!(api.fetch_messages(2, 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn records_keep_timestamps_and_telemetry() {
    let record = numbered(9).with_telemetry(Telemetry {
        rssi: Some(-104.0),
        snr: Some(-3.25),
    });
    let (addr, _state) = start_gateway([record.clone()]).await;
    let api = HttpApi::new(origin(addr)).unwrap();

    assert_eq!(api.fetch_messages(20, 0).await.unwrap(), vec![record]);
}

#[tokio::test]
async fn roster_lists_nodes_heard_on_the_mesh() {
    let (addr, _state) = start_gateway([
        numbered(1),
        MessageRecord::new("node-2", "hi", DateTime::from_timestamp(1_700_000_100, 0).unwrap()),
    ])
    .await;
    let api = HttpApi::new(origin(addr)).unwrap();

    let nodes = api.fetch_nodes().await.unwrap();
    let ids: Vec<_> = nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, ["node-1", "node-2"]);
    assert!(nodes.iter().all(|n| n.status == NodeStatus::Online));
    assert_eq!(nodes[1].last_seen, 1_700_000_100);
}

#[tokio::test]
async fn publish_appends_a_local_record() {
    let (addr, state) = start_gateway([]).await;
    let api = HttpApi::new(origin(addr)).unwrap();

    api.publish("hola").await.unwrap();
    let logged = state.log.page(10, 0).await;
    assert_eq!(payloads(&logged), ["hola"]);
    assert_eq!(logged[0].source, LOCAL_SOURCE);

    assert_eq!(
        api.publish("   ").await,
        Err(SendFailure::Status { status: 400 })
    );
    assert_eq!(state.log.len().await, 1);
}

#[tokio::test]
async fn endpoints_resolve_from_the_origin_root() {
    let (addr, _state) = start_gateway([]).await;
    let api = HttpApi::new(Url::parse(&format!("http://{addr}/nowhere/")).unwrap()).unwrap();
    // Endpoint paths are absolute, so a path on the origin is ignored.
    assert!(api.fetch_messages(1, 0).await.is_ok());

    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let api = HttpApi::new(origin(dead)).unwrap();
    assert!(matches!(
        api.fetch_nodes().await,
        Err(TransportError::Request(_))
    ));
}

// =============================================================================
// Sessions paging backwards
// =============================================================================

#[tokio::test]
async fn session_loads_older_pages_until_exhausted() {
    let (addr, _state) = start_gateway((1..=5).map(numbered)).await;
    let (commands, mut events) = connect_session(addr, 2);

    assert_eq!(expect_accepted(&mut events, RecordOrigin::History).await, "m4");
    assert_eq!(expect_accepted(&mut events, RecordOrigin::History).await, "m5");

    commands.send(SessionCommand::LoadOlder).await.unwrap();
    assert_eq!(expect_prepended(&mut events).await, ["m2", "m3"]);

    commands.send(SessionCommand::LoadOlder).await.unwrap();
    assert_eq!(expect_prepended(&mut events).await, ["m1"]);
    assert_eq!(next_history_event(&mut events).await, SessionEvent::HistoryExhausted);

    commands.send(SessionCommand::LoadOlder).await.unwrap();
    assert_eq!(next_history_event(&mut events).await, SessionEvent::HistoryExhausted);
}

async fn wait_for_live_client(state: &GatewayState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.connection_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn live_arrival_shifts_the_next_older_page() {
    let (addr, state) = start_gateway((1..=5).map(numbered)).await;
    let (commands, mut events) = connect_session(addr, 2);

    assert_eq!(expect_accepted(&mut events, RecordOrigin::History).await, "m4");
    assert_eq!(expect_accepted(&mut events, RecordOrigin::History).await, "m5");
    wait_for_live_client(&state).await;

    // A new record shifts every offset by one.
    state.ingest(numbered(6)).await;
    assert_eq!(expect_accepted(&mut events, RecordOrigin::Live).await, "m6");

    commands.send(SessionCommand::LoadOlder).await.unwrap();
    assert_eq!(expect_prepended(&mut events).await, ["m2", "m3"]);

    commands.send(SessionCommand::LoadOlder).await.unwrap();
    assert_eq!(expect_prepended(&mut events).await, ["m1"]);
    assert_eq!(next_history_event(&mut events).await, SessionEvent::HistoryExhausted);
}

#[tokio::test]
async fn several_live_arrivals_never_repeat_shown_records() {
    let (addr, state) = start_gateway((1..=10).map(numbered)).await;
    let (commands, mut events) = connect_session(addr, 3);

    for expected in ["m8", "m9", "m10"] {
        assert_eq!(expect_accepted(&mut events, RecordOrigin::History).await, expected);
    }
    wait_for_live_client(&state).await;

    state.ingest(numbered(11)).await;
    state.ingest(numbered(12)).await;
    // An echo of the newest record is suppressed but still logged.
    state.ingest(numbered(12)).await;
    assert_eq!(expect_accepted(&mut events, RecordOrigin::Live).await, "m11");
    assert_eq!(expect_accepted(&mut events, RecordOrigin::Live).await, "m12");

    // The echo reaches the session before the command below.
    state.ingest(numbered(13)).await;
    assert_eq!(expect_accepted(&mut events, RecordOrigin::Live).await, "m13");

    commands.send(SessionCommand::LoadOlder).await.unwrap();
    assert_eq!(expect_prepended(&mut events).await, ["m5", "m6", "m7"]);

    commands.send(SessionCommand::LoadOlder).await.unwrap();
    assert_eq!(expect_prepended(&mut events).await, ["m2", "m3", "m4"]);

    commands.send(SessionCommand::LoadOlder).await.unwrap();
    assert_eq!(expect_prepended(&mut events).await, ["m1"]);
    assert_eq!(next_history_event(&mut events).await, SessionEvent::HistoryExhausted);
}
