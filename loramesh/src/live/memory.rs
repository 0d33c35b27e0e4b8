//! Scripted live connections for testing.
//!
//! Each call to [`LiveConnector::open`] on a [`ScriptedConnector`] consumes
//! the next queued script: accept (returning a [`MemoryLink`] the test uses
//! to push frames), refuse, or hang forever. An empty queue refuses.

use std::collections::VecDeque;

use futures_util::stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use loramesh_proto::codec;
use loramesh_proto::frame::LiveFrame;

use super::{ConnectionFailure, FrameData, FrameStream, LiveConnector};

type FrameItem = Result<FrameData, ConnectionFailure>;

enum Script {
    Accept(mpsc::UnboundedReceiver<FrameItem>),
    Refuse(ConnectionFailure),
    Hang,
}

#[derive(Default)]
struct Scripts {
    queue: VecDeque<Script>,
    opened: usize,
    urls: Vec<Url>,
}

/// [`LiveConnector`] that replays queued connection outcomes.
#[derive(Default)]
pub struct ScriptedConnector {
    scripts: Mutex<Scripts>,
}

impl ScriptedConnector {
    /// A connector with nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an attempt that opens. Frames pushed into the returned link
    /// arrive on that connection; dropping the link closes it cleanly.
    #[must_use]
    pub fn accept(&self) -> MemoryLink {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().queue.push_back(Script::Accept(rx));
        MemoryLink { tx }
    }

    /// Queue an attempt that fails before opening.
    pub fn refuse(&self, failure: ConnectionFailure) {
        self.scripts.lock().queue.push_back(Script::Refuse(failure));
    }

    /// Queue an attempt that never resolves.
    pub fn hang(&self) {
        self.scripts.lock().queue.push_back(Script::Hang);
    }

    /// Number of `open` calls so far.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.scripts.lock().opened
    }

    /// URLs passed to `open`, in order.
    #[must_use]
    pub fn opened_urls(&self) -> Vec<Url> {
        self.scripts.lock().urls.clone()
    }
}

impl LiveConnector for ScriptedConnector {
    async fn open(&self, url: &Url) -> Result<FrameStream, ConnectionFailure> {
        let script = {
            let mut scripts = self.scripts.lock();
            scripts.opened += 1;
            scripts.urls.push(url.clone());
            scripts.queue.pop_front()
        };
        match script {
            Some(Script::Accept(rx)) => {
                let frames = stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                });
                Ok(Box::pin(frames))
            }
            Some(Script::Refuse(failure)) => Err(failure),
            Some(Script::Hang) => std::future::pending().await,
            None => Err(ConnectionFailure::Unreachable(
                "no scripted connection".to_string(),
            )),
        }
    }
}

/// Test-side handle of an accepted scripted connection.
pub struct MemoryLink {
    tx: mpsc::UnboundedSender<FrameItem>,
}

impl MemoryLink {
    /// Push a text frame. Returns `false` once the connection is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.tx.send(Ok(FrameData::Text(text.into()))).is_ok()
    }

    /// Push a binary frame.
    pub fn send_binary(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.tx.send(Ok(FrameData::Binary(bytes.into()))).is_ok()
    }

    /// Encode and push a frame.
    pub fn send_frame(&self, frame: &LiveFrame) -> bool {
        codec::encode_frame(frame).is_ok_and(|text| self.send_text(text))
    }

    /// End the connection with a transport failure.
    pub fn fail(self, failure: ConnectionFailure) {
        let _ = self.tx.send(Err(failure));
    }

    /// Close the connection cleanly.
    pub fn close(self) {
        drop(self);
    }

    /// Whether the client side still holds the connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}
