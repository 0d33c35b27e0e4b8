//! reqwest-backed [`GatewayApi`] for a real gateway.

use chrono::Utc;
use reqwest::{Client, Response};
use url::Url;

use loramesh_proto::frame::{MessagesPage, NodesPage, PublishRequest};
use loramesh_proto::message::MessageRecord;
use loramesh_proto::node::NodeInfo;

use super::{GatewayApi, SendFailure, TransportError};

/// HTTP client for one gateway origin.
#[derive(Debug, Clone)]
pub struct HttpApi {
    http: Client,
    origin: Url,
}

impl HttpApi {
    /// Create a client for the gateway at `origin` (e.g. `http://127.0.0.1:5000`).
    ///
    /// Requests carry no deadline of their own; a slow gateway delays the
    /// page, it does not fail it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Request`] if the TLS backend cannot be
    /// initialised.
    pub fn new(origin: Url) -> Result<Self, TransportError> {
        let http = Client::builder()
            .user_agent(concat!("loramesh/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { http, origin })
    }

    /// The gateway origin this client talks to.
    #[must_use]
    pub const fn origin(&self) -> &Url {
        &self.origin
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.origin
            .join(path)
            .map_err(|e| TransportError::Request(format!("bad endpoint {path}: {e}")))
    }
}

fn check_status(response: &Response) -> Result<(), TransportError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(TransportError::Status {
            status: status.as_u16(),
        })
    }
}

impl GatewayApi for HttpApi {
    async fn fetch_messages(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MessageRecord>, TransportError> {
        let url = self.endpoint("/messages")?;
        let mut request = self.http.get(url).query(&[("limit", limit)]);
        if offset > 0 {
            request = request.query(&[("offset", offset)]);
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!(err = %e, limit, offset, "history request failed");
            TransportError::Request(e.to_string())
        })?;
        check_status(&response)?;

        let page: MessagesPage = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        let received_at = Utc::now();
        tracing::debug!(count = page.messages.len(), limit, offset, "history page fetched");
        Ok(page
            .messages
            .into_iter()
            .map(|wire| wire.into_record(received_at))
            .collect())
    }

    async fn fetch_nodes(&self) -> Result<Vec<NodeInfo>, TransportError> {
        let url = self.endpoint("/nodes")?;
        let response = self.http.get(url).send().await.map_err(|e| {
            tracing::warn!(err = %e, "roster request failed");
            TransportError::Request(e.to_string())
        })?;
        check_status(&response)?;

        let page: NodesPage = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        Ok(page.nodes)
    }

    async fn publish(&self, message: &str) -> Result<(), SendFailure> {
        let url = self
            .endpoint("/publish")
            .map_err(|e| SendFailure::Request(e.to_string()))?;
        let body = PublishRequest {
            message: message.to_string(),
        };
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SendFailure::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SendFailure::Status {
                status: status.as_u16(),
            })
        }
    }
}
