//! Gateway server core: shared state, HTTP routes and the live broadcast
//! channel.
//!
//! Every record that enters the gateway, whether ingested from the mesh or
//! published over HTTP, is appended to the [`MessageLog`] and then pushed
//! to every connected live client as a JSON text frame. Live clients never
//! send anything meaningful; their inbound frames are ignored.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use loramesh_proto::codec;
use loramesh_proto::frame::{LiveFrame, MessagesPage, NodesPage, PublishRequest};
use loramesh_proto::message::{MessageRecord, WireMessage};
use loramesh_proto::node::NodeInfo;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{RwLock, mpsc};

use crate::roster::{NodeRoster, RosterError};
use crate::store::MessageLog;

/// Page size used when `GET /messages` omits `limit`.
pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// Shared gateway state: live connections, message log and node roster.
pub struct GatewayState {
    /// Live clients by connection id, each with its writer channel.
    connections: RwLock<HashMap<u64, mpsc::UnboundedSender<Message>>>,
    next_connection: AtomicU64,
    /// Every record the gateway has seen, capped.
    pub log: MessageLog,
    /// Nodes heard on the mesh or pushed explicitly.
    pub roster: NodeRoster,
}

impl Default for GatewayState {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayState {
    /// Empty state with the default history cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_log(MessageLog::new())
    }

    /// Empty state around a pre-configured log.
    #[must_use]
    pub fn with_log(log: MessageLog) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            log,
            roster: NodeRoster::new(),
        }
    }

    /// Registers a live client, returning its connection id.
    pub async fn register(&self, sender: mpsc::UnboundedSender<Message>) -> u64 {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.connections.write().await.insert(id, sender);
        id
    }

    /// Removes a live client from the registry.
    pub async fn unregister(&self, id: u64) -> Option<mpsc::UnboundedSender<Message>> {
        self.connections.write().await.remove(&id)
    }

    /// Number of registered live clients.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Accepts a record heard on the mesh: logs it, refreshes the sender's
    /// roster entry and broadcasts it.
    pub async fn ingest(&self, record: MessageRecord) {
        match self.roster.observe(&record).await {
            Ok(Some(node)) => tracing::debug!(node = %node.id, "roster entry refreshed"),
            Ok(None) => {}
            Err(e) => tracing::warn!(source = %record.source, error = %e, "roster not updated"),
        }
        self.record_and_broadcast(record).await;
    }

    /// Accepts text published by a client. The record is attributed to the
    /// local source marker and broadcast like any mesh record.
    pub async fn publish(&self, text: &str) -> MessageRecord {
        let record = MessageRecord::local(text, Utc::now());
        self.record_and_broadcast(record.clone()).await;
        record
    }

    /// Merges roster entries and pushes them as a `nodes_update` frame.
    ///
    /// # Errors
    ///
    /// Returns the [`RosterError`] that rejected the batch; nothing is sent.
    pub async fn push_roster(&self, nodes: Vec<NodeInfo>) -> Result<(), RosterError> {
        self.roster.upsert(&nodes).await?;
        self.broadcast_frame(&LiveFrame::NodesUpdate(nodes)).await;
        Ok(())
    }

    /// Sends raw text to every live client, bypassing the frame encoder.
    pub async fn broadcast_raw(&self, text: impl Into<String>) {
        let text: String = text.into();
        self.broadcast(Message::Text(text.into())).await;
    }

    /// Send a WebSocket Close frame to all live clients.
    ///
    /// Each writer task forwards the close and ends, which the client sees
    /// as the server dropping the channel.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (id, sender) in conns.iter() {
            tracing::info!(connection = id, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }

    async fn record_and_broadcast(&self, record: MessageRecord) {
        let len = self.log.append(record.clone()).await;
        tracing::debug!(source = %record.source, log_len = len, "record logged");
        self.broadcast_frame(&LiveFrame::Message(record)).await;
    }

    async fn broadcast_frame(&self, frame: &LiveFrame) {
        match codec::encode_frame(frame) {
            Ok(text) => self.broadcast_raw(text).await,
            Err(e) => tracing::error!(error = %e, "failed to encode live frame"),
        }
    }

    async fn broadcast(&self, msg: Message) {
        let conns = self.connections.read().await;
        let mut dead = Vec::new();
        for (id, sender) in conns.iter() {
            if sender.send(msg.clone()).is_err() {
                dead.push(*id);
            }
        }
        drop(conns);
        for id in dead {
            tracing::warn!(connection = id, "live client gone, unregistering");
            self.unregister(id).await;
        }
    }
}

/// Handles an upgraded live connection until either side ends it.
pub async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let id = state.register(tx).await;
    tracing::info!(connection = id, "live client connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(connection = id, "live write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            if let Message::Close(_) = msg {
                tracing::info!(connection = id, "received close frame");
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.unregister(id).await;
    tracing::info!(connection = id, "live client disconnected");
}

/// Query string of `GET /messages`.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
}

/// Error body returned by the HTTP routes.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    reason: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.reason }))).into_response()
    }
}

async fn messages_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<MessagesPage> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let records = state.log.page(limit, query.offset).await;
    tracing::debug!(limit, offset = query.offset, count = records.len(), "history page served");
    Json(MessagesPage {
        messages: records.iter().map(WireMessage::from).collect(),
    })
}

async fn nodes_handler(State(state): State<Arc<GatewayState>>) -> Json<NodesPage> {
    Json(NodesPage {
        nodes: state.roster.snapshot().await,
    })
}

async fn publish_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<PublishRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let text = body.message.trim();
    if text.is_empty() {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            reason: "message must not be empty".to_string(),
        });
    }
    state.publish(text).await;
    tracing::info!(len = text.len(), "message published");
    Ok(Json(json!({ "status": "ok" })))
}

/// axum handler that upgrades an HTTP request to a live connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// The gateway's routes over `state`.
pub fn router(state: Arc<GatewayState>) -> axum::Router {
    axum::Router::new()
        .route("/messages", axum::routing::get(messages_handler))
        .route("/nodes", axum::routing::get(nodes_handler))
        .route("/publish", axum::routing::post(publish_handler))
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state)
}

/// Starts a gateway with empty state on `addr`, returning the bound address
/// and the server task.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(GatewayState::new())).await
}

/// Starts a gateway serving a shared [`GatewayState`].
///
/// The same state may be served on several addresses; `main` uses this to
/// expose the API and live ports side by side.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<GatewayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "gateway server error");
        }
    });

    Ok((bound_addr, handle))
}
