use std::time::Duration;

use coursechat_common::{ChatError, ChatMessage, ChatRequest, Error, ErrorKind, Result, classify};
use futures::StreamExt;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::consumer::{ConsumerUpdate, StreamConsumer};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_ID_HEADER: &str = "x-request-id";

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed(ChatMessage),
    Failed(ChatError),
    /// Aborted by the caller or by the gateway. No message was produced.
    Cancelled,
}

/// HTTP client for the chat gateway. Construct once and share.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "gateway URL '{base_url}' must start with http:// or https://"
            )));
        }
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send `request` and drive the reply stream to its end, reporting each
    /// update to `on_update`. Never returns an error: failures come back as
    /// [`TurnOutcome::Failed`].
    pub async fn send(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        mut on_update: impl FnMut(&ConsumerUpdate),
    ) -> TurnOutcome {
        let url = format!("{}/api/chat", self.base_url);
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TurnOutcome::Cancelled,
            sent = self.http.post(&url).json(request).send() => sent,
        };

        let response = match sent {
            Ok(response) => response,
            Err(e) => return TurnOutcome::Failed(classify(&transport_error(e))),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = serde_json::from_str::<ChatError>(&body).unwrap_or_else(|_| {
                classify(&Error::Provider {
                    status: status.as_u16(),
                    message: body,
                })
            });
            warn!(status = status.as_u16(), kind = %error.kind, "chat request rejected");
            return TurnOutcome::Failed(error);
        }

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        debug!(request_id = ?request_id, "reading reply stream");

        let mut consumer = StreamConsumer::new();
        let mut body = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if let Some(id) = &request_id {
                        if let Err(e) = self.cancel(id).await {
                            debug!("server-side cancel failed: {}", e);
                        }
                    }
                    info!("turn cancelled by caller");
                    return TurnOutcome::Cancelled;
                }
                next = body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    for update in consumer.push(&chunk) {
                        on_update(&update);
                    }
                    if consumer.is_done() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!("reply stream dropped: {}", e);
                    break;
                }
                None => break,
            }
        }

        for update in consumer.finish() {
            on_update(&update);
        }

        if consumer.is_cancelled() {
            info!(request_id = ?request_id, "turn cancelled by the gateway");
            return TurnOutcome::Cancelled;
        }
        if let Some(error) = consumer.error() {
            return TurnOutcome::Failed(error.clone());
        }
        match consumer.message() {
            Some(message) => TurnOutcome::Completed(message.clone()),
            None => TurnOutcome::Failed(ChatError::new(
                ErrorKind::Network,
                "the connection closed before any reply arrived",
            )),
        }
    }

    /// Ask the gateway to cancel an in-flight turn. Returns false when the
    /// gateway no longer knows the turn.
    pub async fn cancel(&self, request_id: &str) -> Result<bool> {
        let url = format!("{}/api/chat/{}/cancel", self.base_url, request_id);
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(transport_error)?;
        Ok(response.status().is_success())
    }

    /// `GET /health` on the gateway.
    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        match self.http.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("gateway request timed out: {e}"))
    } else {
        Error::Network(format!("gateway request failed: {e}"))
    }
}
