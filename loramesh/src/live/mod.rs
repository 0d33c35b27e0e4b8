//! Live channel lifecycle: connect, detect failure, reconnect with backoff.
//!
//! [`LiveChannel`] owns the connection state machine. It never blocks: each
//! connection attempt runs as a background task that reports back through
//! [`LiveSignal`]s, and the owner feeds those signals to
//! [`LiveChannel::handle`] on its own event loop. Transitions:
//!
//! ```text
//! CLOSED|FAILED ── connect() ──→ CONNECTING ── opened ──→ OPEN
//!                                   │                       │
//!                          timeout / refused       error / close
//!                                   ↓                       ↓
//!                                 FAILED ←──────────────────┘
//!                                   │
//!                          backoff timer fires → connect()
//! ```
//!
//! Connectors:
//! - [`ws::WsConnector`]: WebSocket via tokio-tungstenite
//! - [`memory::ScriptedConnector`]: scripted in-process connections for tests

pub mod backoff;
pub mod memory;
pub mod ws;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{Stream, StreamExt};
use url::Url;

use loramesh_proto::codec;
use loramesh_proto::frame::LiveFrame;

use crate::schedule::{Scheduler, TaskHandle};

use self::backoff::ReconnectPolicy;

/// Lifecycle state of the live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected and not trying to be.
    Closed,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected; frames are flowing.
    Open,
    /// The last attempt or connection failed; a reconnect is pending.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Why a live connection could not be established or was lost.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionFailure {
    /// The connection did not open within the establishment timeout.
    #[error("connection attempt timed out")]
    Timeout,

    /// The gateway could not be reached.
    #[error("gateway unreachable: {0}")]
    Unreachable(String),

    /// The gateway closed the connection.
    #[error("connection closed by gateway")]
    Closed,

    /// Any other transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// One raw frame as delivered by a connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameData {
    /// A text frame.
    Text(String),
    /// A binary frame; decoded as UTF-8 JSON.
    Binary(Vec<u8>),
}

/// Inbound frames of an open connection.
///
/// The stream ends when the peer closes cleanly; an `Err` item is a terminal
/// transport failure.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<FrameData, ConnectionFailure>> + Send>>;

/// Opens push connections to the gateway.
pub trait LiveConnector: Send + Sync + 'static {
    /// Open a connection to `url`. Resolves once the connection is usable.
    ///
    /// Implementations need not enforce a timeout; [`LiveChannel`] races
    /// the returned future against its own establishment timer.
    fn open(&self, url: &Url)
    -> impl Future<Output = Result<FrameStream, ConnectionFailure>> + Send;
}

/// Completion signals from connection tasks and timers.
///
/// Every signal but `ReconnectDue` carries the generation of the attempt
/// that produced it; signals from a superseded attempt are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveSignal {
    /// The connector opened the connection.
    Opened {
        /// Attempt that opened.
        generation: u64,
    },
    /// The connector gave up before opening.
    OpenFailed {
        /// Attempt that failed.
        generation: u64,
        /// Reason reported by the connector.
        failure: ConnectionFailure,
    },
    /// The establishment timer fired.
    ConnectTimeout {
        /// Attempt the timer was armed for.
        generation: u64,
    },
    /// The reconnect backoff timer fired.
    ReconnectDue {
        /// Identifies the timer; only the latest one is honoured.
        ticket: u64,
    },
    /// A frame arrived on an open connection.
    Frame {
        /// Connection the frame arrived on.
        generation: u64,
        /// Raw frame contents.
        data: FrameData,
    },
    /// An open connection ended.
    Closed {
        /// Connection that ended.
        generation: u64,
        /// `None` for a clean close.
        failure: Option<ConnectionFailure>,
    },
}

/// What the owner of a [`LiveChannel`] needs to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A reconnect was scheduled after a failure.
    ReconnectScheduled {
        /// Consecutive failures since the last successful open.
        attempt: u32,
        /// Time until the next `connect()`.
        delay: Duration,
    },
    /// A decoded frame arrived.
    Frame(LiveFrame),
}

/// Derive the live URL from the gateway origin: same host, `port`, `path`,
/// `https` → `wss` and anything else → `ws`.
///
/// # Errors
///
/// Returns [`url::ParseError`] if the origin has no host or the result is
/// not a valid URL.
pub fn live_url(origin: &Url, port: u16, path: &str) -> Result<Url, url::ParseError> {
    let scheme = if origin.scheme() == "https" { "wss" } else { "ws" };
    let host = origin.host_str().ok_or(url::ParseError::EmptyHost)?;
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    Url::parse(&format!("{scheme}://{host}:{port}{path}"))
}

/// Live channel state machine.
///
/// `E` is the owner's event type; the channel's background tasks deliver
/// [`LiveSignal`]s into it through the [`Scheduler`].
pub struct LiveChannel<C, E> {
    connector: Arc<C>,
    url: Url,
    scheduler: Scheduler<E>,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
    state: ConnectionState,
    generation: u64,
    connection: Option<TaskHandle>,
    connect_timer: Option<TaskHandle>,
    reconnect_timer: Option<TaskHandle>,
    reconnect_ticket: u64,
}

impl<C, E> LiveChannel<C, E>
where
    C: LiveConnector,
    E: From<LiveSignal> + Send + 'static,
{
    /// Create a closed channel. Nothing happens until [`connect`](Self::connect).
    pub fn new(
        connector: Arc<C>,
        url: Url,
        scheduler: Scheduler<E>,
        connect_timeout: Duration,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            connector,
            url,
            scheduler,
            connect_timeout,
            policy,
            state: ConnectionState::Closed,
            generation: 0,
            connection: None,
            connect_timer: None,
            reconnect_timer: None,
            reconnect_ticket: 0,
        }
    }

    /// Current connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Failures since the last successful open.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.policy.attempt()
    }

    /// URL the channel connects to.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Start a connection attempt: `CLOSED|FAILED → CONNECTING`.
    ///
    /// A no-op while already connecting or open. Any pending reconnect timer
    /// is cancelled.
    pub fn connect(&mut self) -> Vec<LiveEvent> {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            tracing::debug!(state = %self.state, "connect ignored");
            return Vec::new();
        }
        if let Some(timer) = self.reconnect_timer.take() {
            timer.cancel();
        }

        self.generation += 1;
        let generation = self.generation;
        self.state = ConnectionState::Connecting;
        tracing::info!(url = %self.url, generation, attempt = self.policy.attempt(), "connecting live channel");

        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let emitter = self.scheduler.emitter();
        self.connection = Some(self.scheduler.spawn(async move {
            let mut frames = match connector.open(&url).await {
                Ok(frames) => frames,
                Err(failure) => {
                    emitter.emit(LiveSignal::OpenFailed {
                        generation,
                        failure,
                    });
                    return;
                }
            };
            if !emitter.emit(LiveSignal::Opened { generation }) {
                return;
            }
            let failure = loop {
                match frames.next().await {
                    Some(Ok(data)) => {
                        if !emitter.emit(LiveSignal::Frame { generation, data }) {
                            return;
                        }
                    }
                    Some(Err(failure)) => break Some(failure),
                    None => break None,
                }
            };
            emitter.emit(LiveSignal::Closed {
                generation,
                failure,
            });
        }));
        self.connect_timer = Some(
            self.scheduler
                .schedule(self.connect_timeout, LiveSignal::ConnectTimeout { generation }),
        );

        vec![LiveEvent::StateChanged(ConnectionState::Connecting)]
    }

    /// Tear the channel down: any state → `CLOSED`, no reconnect.
    pub fn close(&mut self) -> Vec<LiveEvent> {
        self.cancel_pending();
        if let Some(timer) = self.reconnect_timer.take() {
            timer.cancel();
        }
        // Late signals from the torn-down attempt must not match.
        self.generation += 1;
        if self.state == ConnectionState::Closed {
            return Vec::new();
        }
        tracing::info!(url = %self.url, "live channel closed");
        self.state = ConnectionState::Closed;
        vec![LiveEvent::StateChanged(ConnectionState::Closed)]
    }

    /// Apply a signal produced by one of this channel's tasks.
    pub fn handle(&mut self, signal: LiveSignal) -> Vec<LiveEvent> {
        match signal {
            LiveSignal::Opened { generation } => {
                if !self.is_connecting(generation) {
                    return Vec::new();
                }
                if let Some(timer) = self.connect_timer.take() {
                    timer.cancel();
                }
                self.state = ConnectionState::Open;
                self.policy.reset();
                tracing::info!(url = %self.url, generation, "live channel open");
                vec![LiveEvent::StateChanged(ConnectionState::Open)]
            }
            LiveSignal::OpenFailed {
                generation,
                failure,
            } => {
                if !self.is_connecting(generation) {
                    return Vec::new();
                }
                self.fail(&failure)
            }
            LiveSignal::ConnectTimeout { generation } => {
                if !self.is_connecting(generation) {
                    return Vec::new();
                }
                self.fail(&ConnectionFailure::Timeout)
            }
            LiveSignal::ReconnectDue { ticket } => {
                if ticket != self.reconnect_ticket || self.reconnect_timer.take().is_none() {
                    return Vec::new();
                }
                self.connect()
            }
            LiveSignal::Frame { generation, data } => {
                if !self.is_open(generation) {
                    return Vec::new();
                }
                let received_at = Utc::now();
                let decoded = match &data {
                    FrameData::Text(text) => codec::decode_frame(text, received_at),
                    FrameData::Binary(bytes) => codec::decode_binary_frame(bytes, received_at),
                };
                match decoded {
                    Ok(frame) => vec![LiveEvent::Frame(frame)],
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping malformed live frame");
                        Vec::new()
                    }
                }
            }
            LiveSignal::Closed {
                generation,
                failure,
            } => {
                if !self.is_open(generation) {
                    return Vec::new();
                }
                self.fail(&failure.unwrap_or(ConnectionFailure::Closed))
            }
        }
    }

    fn is_connecting(&self, generation: u64) -> bool {
        generation == self.generation && self.state == ConnectionState::Connecting
    }

    fn is_open(&self, generation: u64) -> bool {
        generation == self.generation && self.state == ConnectionState::Open
    }

    /// Abort the connection task and the establishment timer.
    fn cancel_pending(&mut self) {
        if let Some(timer) = self.connect_timer.take() {
            timer.cancel();
        }
        if let Some(connection) = self.connection.take() {
            connection.cancel();
        }
    }

    fn fail(&mut self, failure: &ConnectionFailure) -> Vec<LiveEvent> {
        self.cancel_pending();
        self.state = ConnectionState::Failed;
        tracing::warn!(url = %self.url, error = %failure, "live channel failed");

        let mut events = vec![LiveEvent::StateChanged(ConnectionState::Failed)];
        events.push(self.schedule_reconnect());
        events
    }

    /// Arm the backoff timer, replacing any pending one.
    fn schedule_reconnect(&mut self) -> LiveEvent {
        let delay = self.policy.next_delay();
        let attempt = self.policy.attempt();
        self.reconnect_ticket += 1;
        let ticket = self.reconnect_ticket;
        if let Some(previous) = self.reconnect_timer.replace(
            self.scheduler
                .schedule(delay, LiveSignal::ReconnectDue { ticket }),
        ) {
            previous.cancel();
        }
        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = delay.as_millis() as u64;
        tracing::info!(attempt, delay_ms, "reconnect scheduled");
        LiveEvent::ReconnectScheduled { attempt, delay }
    }
}
