//! Session coordinator: wires the stream components to presentation.
//!
//! A session owns the history cursor, the reconciler, the live channel and
//! the peer table, and runs them all on one task. Presentation talks to it
//! over [`SessionCommand`] / [`SessionEvent`] channels:
//!
//! ```text
//! presentation  ─── SessionCommand ──→  session loop  ←── Signal ─── timers,
//!               ←── SessionEvent ────                               fetches,
//!                                                                   connection
//! ```
//!
//! Every network call and timer runs as a helper task that owns no session
//! state; its result comes back as an internal `Signal` and is handled on
//! the loop like any other event, one at a time.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

use loramesh_proto::frame::LiveFrame;
use loramesh_proto::message::MessageRecord;
use loramesh_proto::node::NodeInfo;

use crate::api::{GatewayApi, SendFailure, TransportError};
use crate::history::{self, HistoryLoader, PageRequest};
use crate::live::backoff::ReconnectPolicy;
use crate::live::{ConnectionState, LiveChannel, LiveConnector, LiveEvent, LiveSignal};
use crate::peers::{PeerExpiry, PeerRecord, PeerTracker};
use crate::reconcile::Reconciler;
use crate::schedule::Scheduler;

/// Default capacity of the command and event channels.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Tunables of one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL of the live channel.
    pub live_url: Url,
    /// Records per history page.
    pub page_size: usize,
    /// Time allowed for a live connection to open.
    pub connect_timeout: Duration,
    /// Reconnect schedule.
    pub reconnect: ReconnectPolicy,
    /// Time after the last sighting at which a peer goes offline.
    pub node_timeout: Duration,
    /// Capacity of the command and event channels.
    pub channel_capacity: usize,
}

impl SessionConfig {
    /// Defaults for everything but the live URL.
    #[must_use]
    pub fn new(live_url: Url) -> Self {
        Self {
            live_url,
            page_size: 20,
            connect_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
            node_timeout: Duration::from_secs(60),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Correlates a local send with its eventual failure report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SendId(Uuid);

impl SendId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for SendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Where an accepted record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOrigin {
    /// The initial history page.
    History,
    /// Pushed on the live channel.
    Live,
    /// Optimistic echo of a local send.
    Local {
        /// Identifies the send.
        send_id: SendId,
    },
}

/// Commands from presentation to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Publish a message. Surrounding whitespace is trimmed; blank text is
    /// ignored.
    Send {
        /// Message text.
        text: String,
    },
    /// Load the next older history page.
    LoadOlder,
    /// Close the live channel and end the session.
    Shutdown,
}

/// Events from the session to presentation.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A record joined the end of the stream.
    MessageAccepted {
        /// The record.
        record: MessageRecord,
        /// How it arrived.
        origin: RecordOrigin,
    },
    /// Older records to show before everything else, oldest first.
    HistoryPrepended {
        /// The records.
        records: Vec<MessageRecord>,
    },
    /// The gateway has no older records.
    HistoryExhausted,
    /// A history page could not be loaded.
    HistoryFailed {
        /// Why.
        reason: TransportError,
    },
    /// The live channel changed state.
    ConnectionChanged {
        /// New state.
        state: ConnectionState,
    },
    /// A reconnect is pending.
    ReconnectScheduled {
        /// Consecutive failures since the last open.
        attempt: u32,
        /// Time until the next attempt.
        delay: Duration,
    },
    /// A peer was added or changed.
    PeerUpdated(PeerRecord),
    /// The initial roster could not be fetched.
    RosterFailed {
        /// Why.
        reason: TransportError,
    },
    /// A publish failed; the optimistic record stays in the stream.
    SendFailed {
        /// The failed send.
        send_id: SendId,
        /// Its text.
        payload: String,
        /// Why.
        reason: SendFailure,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageKind {
    Initial,
    Older,
}

/// Completion events delivered to the session loop.
#[derive(Debug)]
enum Signal {
    Live(LiveSignal),
    PeerExpired(PeerExpiry),
    PageLoaded {
        kind: PageKind,
        request: PageRequest,
        result: Result<Vec<MessageRecord>, TransportError>,
    },
    RosterLoaded(Result<Vec<NodeInfo>, TransportError>),
    Published {
        send_id: SendId,
        payload: String,
        result: Result<(), SendFailure>,
    },
}

impl From<LiveSignal> for Signal {
    fn from(signal: LiveSignal) -> Self {
        Self::Live(signal)
    }
}

impl From<PeerExpiry> for Signal {
    fn from(expiry: PeerExpiry) -> Self {
        Self::PeerExpired(expiry)
    }
}

/// Presentation dropped its event receiver.
type Delivery = Result<(), mpsc::error::SendError<SessionEvent>>;

struct Session<A, C> {
    api: Arc<A>,
    scheduler: Scheduler<Signal>,
    history: HistoryLoader,
    reconciler: Reconciler,
    live: LiveChannel<C, Signal>,
    peers: PeerTracker<Signal>,
    events: mpsc::Sender<SessionEvent>,
}

/// Spawn a session and return its command sender and event receiver.
///
/// The session immediately requests the newest history page and the node
/// roster and starts connecting the live channel. It runs until
/// [`SessionCommand::Shutdown`], until the command sender is dropped, or
/// until the event receiver is dropped; the event receiver yields `None`
/// once it has ended.
pub fn spawn_session<A, C>(
    config: SessionConfig,
    api: Arc<A>,
    connector: Arc<C>,
) -> (mpsc::Sender<SessionCommand>, mpsc::Receiver<SessionEvent>)
where
    A: GatewayApi,
    C: LiveConnector,
{
    let capacity = config.channel_capacity.max(1);
    let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
    let (evt_tx, evt_rx) = mpsc::channel(capacity);
    let (scheduler, signals) = Scheduler::new();

    let session = Session {
        api,
        history: HistoryLoader::new(config.page_size),
        reconciler: Reconciler::new(),
        live: LiveChannel::new(
            connector,
            config.live_url,
            scheduler.clone(),
            config.connect_timeout,
            config.reconnect,
        ),
        peers: PeerTracker::new(scheduler.clone(), config.node_timeout),
        scheduler,
        events: evt_tx,
    };
    tokio::spawn(session.run(cmd_rx, signals));

    (cmd_tx, evt_rx)
}

impl<A, C> Session<A, C>
where
    A: GatewayApi,
    C: LiveConnector,
{
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut signals: mpsc::UnboundedReceiver<Signal>,
    ) {
        tracing::info!(live_url = %self.live.url(), "session started");
        if self.start().await.is_ok() {
            loop {
                let delivery = tokio::select! {
                    Some(signal) = signals.recv() => self.handle_signal(signal).await,
                    command = commands.recv() => match command {
                        Some(SessionCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command).await,
                    },
                };
                if delivery.is_err() {
                    tracing::info!("presentation went away");
                    break;
                }
            }
        }
        for event in self.live.close() {
            let _ = self.forward_live(event).await;
        }
        tracing::info!("session ended");
    }

    async fn start(&mut self) -> Delivery {
        self.reconciler.begin_initial_load();
        let request = self.history.initial_request();
        self.fetch_page(PageKind::Initial, request);

        let api = Arc::clone(&self.api);
        self.scheduler
            .spawn_reporting(async move { Signal::RosterLoaded(api.fetch_nodes().await) })
            .detach();

        for event in self.live.connect() {
            self.forward_live(event).await?;
        }
        Ok(())
    }

    fn fetch_page(&self, kind: PageKind, request: PageRequest) {
        let api = Arc::clone(&self.api);
        self.scheduler
            .spawn_reporting(async move {
                let result = history::load_page(api.as_ref(), request).await;
                Signal::PageLoaded {
                    kind,
                    request,
                    result,
                }
            })
            .detach();
    }

    async fn handle_command(&mut self, command: SessionCommand) -> Delivery {
        match command {
            SessionCommand::Send { text } => self.send(&text).await,
            SessionCommand::LoadOlder => {
                if self.history.in_flight() {
                    tracing::debug!("history request already in flight");
                } else if let Some(request) = self.history.older_request() {
                    tracing::debug!(offset = request.offset, "loading older history");
                    self.fetch_page(PageKind::Older, request);
                } else {
                    self.emit(SessionEvent::HistoryExhausted).await?;
                }
                Ok(())
            }
            // Handled by the loop.
            SessionCommand::Shutdown => Ok(()),
        }
    }

    async fn send(&mut self, text: &str) -> Delivery {
        let payload = text.trim();
        if payload.is_empty() {
            return Ok(());
        }
        let send_id = SendId::new();
        let payload = payload.to_string();

        if let Some(record) = self
            .reconciler
            .accept_local(MessageRecord::local(payload.clone(), Utc::now()))
        {
            self.emit(SessionEvent::MessageAccepted {
                record,
                origin: RecordOrigin::Local { send_id },
            })
            .await?;
        }

        let api = Arc::clone(&self.api);
        self.scheduler
            .spawn_reporting(async move {
                let result = api.publish(&payload).await;
                Signal::Published {
                    send_id,
                    payload,
                    result,
                }
            })
            .detach();
        Ok(())
    }

    async fn handle_signal(&mut self, signal: Signal) -> Delivery {
        match signal {
            Signal::Live(signal) => {
                for event in self.live.handle(signal) {
                    self.forward_live(event).await?;
                }
            }
            Signal::PeerExpired(expiry) => {
                if let Some(peer) = self.peers.expire(&expiry) {
                    self.emit(SessionEvent::PeerUpdated(peer)).await?;
                }
            }
            Signal::PageLoaded {
                kind: PageKind::Initial,
                request,
                result,
            } => self.initial_page_loaded(request, result).await?,
            Signal::PageLoaded {
                kind: PageKind::Older,
                request,
                result,
            } => self.older_page_loaded(request, result).await?,
            Signal::RosterLoaded(Ok(nodes)) => self.apply_roster(&nodes).await?,
            Signal::RosterLoaded(Err(reason)) => {
                tracing::warn!(error = %reason, "roster fetch failed");
                self.emit(SessionEvent::RosterFailed { reason }).await?;
            }
            Signal::Published {
                send_id,
                result: Ok(()),
                ..
            } => tracing::debug!(%send_id, "publish accepted"),
            Signal::Published {
                send_id,
                payload,
                result: Err(reason),
            } => {
                tracing::warn!(%send_id, error = %reason, "publish failed");
                self.emit(SessionEvent::SendFailed {
                    send_id,
                    payload,
                    reason,
                })
                .await?;
            }
        }
        Ok(())
    }

    async fn initial_page_loaded(
        &mut self,
        request: PageRequest,
        result: Result<Vec<MessageRecord>, TransportError>,
    ) -> Delivery {
        match result {
            Ok(page) => {
                self.history.complete(request, page.len());
                tracing::info!(count = page.len(), "initial history loaded");
                for record in &page {
                    if let Some(peer) = self.peers.observe_record(record) {
                        self.emit(SessionEvent::PeerUpdated(peer)).await?;
                    }
                }
                for record in self.reconciler.accept_history(page) {
                    self.emit(SessionEvent::MessageAccepted {
                        record,
                        origin: RecordOrigin::History,
                    })
                    .await?;
                }
                if self.history.is_exhausted() {
                    self.emit(SessionEvent::HistoryExhausted).await?;
                }
            }
            Err(reason) => {
                self.history.fail();
                tracing::warn!(error = %reason, "initial history load failed");
                self.emit(SessionEvent::HistoryFailed { reason }).await?;
            }
        }
        for record in self.reconciler.finish_initial_load() {
            self.emit(SessionEvent::MessageAccepted {
                record,
                origin: RecordOrigin::Live,
            })
            .await?;
        }
        Ok(())
    }

    async fn older_page_loaded(
        &mut self,
        request: PageRequest,
        result: Result<Vec<MessageRecord>, TransportError>,
    ) -> Delivery {
        match result {
            Ok(page) => {
                self.history.complete(request, page.len());
                let records = self.reconciler.accept_older(page);
                tracing::debug!(
                    offset = request.offset,
                    kept = records.len(),
                    "older history loaded"
                );
                if !records.is_empty() {
                    self.emit(SessionEvent::HistoryPrepended { records }).await?;
                }
                if self.history.is_exhausted() {
                    self.emit(SessionEvent::HistoryExhausted).await?;
                }
            }
            Err(reason) => {
                self.history.fail();
                tracing::warn!(error = %reason, offset = request.offset, "older history load failed");
                self.emit(SessionEvent::HistoryFailed { reason }).await?;
            }
        }
        Ok(())
    }

    async fn forward_live(&mut self, event: LiveEvent) -> Delivery {
        match event {
            LiveEvent::StateChanged(state) => {
                self.emit(SessionEvent::ConnectionChanged { state }).await
            }
            LiveEvent::ReconnectScheduled { attempt, delay } => {
                self.emit(SessionEvent::ReconnectScheduled { attempt, delay })
                    .await
            }
            LiveEvent::Frame(LiveFrame::Message(record)) => {
                // The gateway logged it, echo or not.
                self.history.note_live_record();
                let peer = self.peers.observe_record(&record);
                if let Some(record) = self.reconciler.accept_live(record) {
                    self.emit(SessionEvent::MessageAccepted {
                        record,
                        origin: RecordOrigin::Live,
                    })
                    .await?;
                }
                if let Some(peer) = peer {
                    self.emit(SessionEvent::PeerUpdated(peer)).await?;
                }
                Ok(())
            }
            LiveEvent::Frame(LiveFrame::NodesUpdate(nodes)) => self.apply_roster(&nodes).await,
        }
    }

    async fn apply_roster(&mut self, nodes: &[NodeInfo]) -> Delivery {
        for peer in self.peers.apply_roster(nodes) {
            self.emit(SessionEvent::PeerUpdated(peer)).await?;
        }
        Ok(())
    }

    async fn emit(&self, event: SessionEvent) -> Delivery {
        self.events.send(event).await
    }
}
