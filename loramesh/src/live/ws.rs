//! WebSocket connector for the gateway's live channel.
//!
//! The gateway pushes one JSON object per text frame and never expects
//! anything back, so the connection is consumed read-only. Ping/pong is
//! answered by tungstenite while the stream is polled.

use futures_util::{StreamExt, stream};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use url::Url;

use super::{ConnectionFailure, FrameData, FrameStream, LiveConnector};

/// [`LiveConnector`] over tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl LiveConnector for WsConnector {
    async fn open(&self, url: &Url) -> Result<FrameStream, ConnectionFailure> {
        let (ws, _response) = connect_async(url.as_str()).await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "live WebSocket connect failed");
            map_ws_connect_error(e)
        })?;
        tracing::debug!(url = %url, "live WebSocket handshake complete");

        let frames = stream::unfold(Some(ws), |ws| async move {
            let mut ws = ws?;
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return Some((Ok(FrameData::Text(text.as_str().to_owned())), Some(ws)));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        return Some((Ok(FrameData::Binary(bytes.to_vec())), Some(ws)));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(?frame, "gateway closed the live channel");
                        return None;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Some((Err(ConnectionFailure::Transport(e.to_string())), None));
                    }
                    None => return None,
                }
            }
        });
        Ok(Box::pin(frames))
    }
}

/// Classify a handshake error.
fn map_ws_connect_error(err: WsError) -> ConnectionFailure {
    match err {
        WsError::Io(io_err) => {
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::AddrNotAvailable
            ) {
                ConnectionFailure::Unreachable(io_err.to_string())
            } else {
                ConnectionFailure::Transport(io_err.to_string())
            }
        }
        WsError::Http(response) => ConnectionFailure::Transport(format!(
            "gateway HTTP error: status {}",
            response.status()
        )),
        WsError::Url(e) => ConnectionFailure::Unreachable(format!("bad live URL: {e}")),
        other => ConnectionFailure::Transport(other.to_string()),
    }
}
