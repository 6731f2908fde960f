//! Request/response exchange over pooled connections.

use std::time::Duration;

use bytes::Bytes;
use h2::client::ResponseFuture;
use push_core::{ProviderResponse, PushError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::Connection;

/// Error bodies are small JSON objects; anything larger is truncated.
const MAX_RESPONSE_BODY: usize = 64 * 1024;

/// Sends one request per stream and waits for its reply under a deadline.
#[derive(Debug, Clone, Copy)]
pub struct StreamDispatcher {
    default_timeout: Duration,
}

impl StreamDispatcher {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Send `request` with `body` on a fresh stream of `conn`.
    ///
    /// The deadline covers waiting for a stream slot as well as the reply.
    /// On timeout or cancellation an opened stream is reset with `CANCEL`.
    pub async fn send(
        &self,
        conn: &Connection,
        request: http::Request<()>,
        body: Bytes,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, PushError> {
        let limit = timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + limit;

        let open = async {
            let permit = conn.acquire_stream().await?;
            conn.touch();
            let mut sender = conn.sender().ready().await.map_err(classify_h2_error)?;
            let (response, mut stream) = sender
                .send_request(request, body.is_empty())
                .map_err(classify_h2_error)?;
            if !body.is_empty() {
                stream.send_data(body, true).map_err(classify_h2_error)?;
            }
            Ok::<_, PushError>((permit, response, stream))
        };

        let (_permit, response, mut stream) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PushError::Cancelled),
            opened = tokio::time::timeout_at(deadline, open) => {
                opened.map_err(|_| PushError::Timeout(limit))??
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                stream.send_reset(h2::Reason::CANCEL);
                Err(PushError::Cancelled)
            }
            reply = tokio::time::timeout_at(deadline, read_response(response)) => match reply {
                Ok(reply) => reply,
                Err(_) => {
                    tracing::debug!(connection = conn.id(), timeout = ?limit, "request timed out, resetting stream");
                    stream.send_reset(h2::Reason::CANCEL);
                    Err(PushError::Timeout(limit))
                }
            },
        }
    }
}

async fn read_response(response: ResponseFuture) -> Result<ProviderResponse, PushError> {
    let response = response.await.map_err(classify_h2_error)?;
    let status = response.status().as_u16();
    let apns_id = response
        .headers()
        .get("apns-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let mut body = response.into_body();
    let mut buf = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(classify_h2_error)?;
        let _ = body.flow_control().release_capacity(chunk.len());
        if buf.len() < MAX_RESPONSE_BODY {
            let room = MAX_RESPONSE_BODY - buf.len();
            buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        }
    }

    Ok(ProviderResponse::from_parts(status, apns_id, &buf))
}

/// Refused streams were never processed and can be retried as-is; everything else is transport.
pub(crate) fn classify_h2_error(err: h2::Error) -> PushError {
    if err.reason() == Some(h2::Reason::REFUSED_STREAM) && !err.is_go_away() {
        return PushError::Transient {
            reason: "RefusedStream".to_string(),
        };
    }
    PushError::Transport(err.to_string())
}
