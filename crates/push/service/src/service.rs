//! Public send API.

use std::collections::BTreeMap;
use std::sync::Arc;

use push_apns::Transport;
use push_core::{Credential, Delivered, NotificationIntent, PushError, token_prefix};
use push_storage::DeviceRegistry;
use tokio_util::sync::CancellationToken;

use crate::{BatchReport, CredentialSource, DeliveryEngine};

/// Resolves targets and runs sends through the delivery engine.
pub struct PushService<T, R, S> {
    engine: DeliveryEngine<T, R>,
    credentials: S,
}

impl<T, R, S> PushService<T, R, S>
where
    T: Transport,
    R: DeviceRegistry,
    S: CredentialSource,
{
    /// Create a new push service.
    pub fn new(engine: DeliveryEngine<T, R>, credentials: S) -> Self {
        Self {
            engine,
            credentials,
        }
    }

    pub fn engine(&self) -> &DeliveryEngine<T, R> {
        &self.engine
    }

    pub fn credentials(&self) -> &S {
        &self.credentials
    }

    /// Send one notification and return the terminal result.
    ///
    /// `credential` and `topic` override the application's configured values.
    /// An invalid token is deactivated before the error is returned. Repeated
    /// calls are independent sends.
    pub async fn send_one(
        &self,
        token: &str,
        intent: &NotificationIntent,
        application_id: Option<&str>,
        credential: Option<Arc<Credential>>,
        topic: Option<&str>,
    ) -> Result<Delivered, PushError> {
        let target = self.credentials.target(application_id, credential, topic)?;
        let intent = intent.for_token(token);

        let result = self
            .engine
            .deliver(&target, &intent, &CancellationToken::new())
            .await;

        match &result {
            Ok(delivered) => {
                tracing::info!(token = token_prefix(token), apns_id = ?delivered.apns_id, "notification delivered");
            }
            Err(PushError::InvalidToken { reason }) => {
                tracing::info!(token = token_prefix(token), reason = %reason, "device token rejected");
                self.engine.deactivate(token);
            }
            Err(e) => {
                tracing::warn!(token = token_prefix(token), error = %e, "notification failed");
            }
        }
        result
    }

    /// Send the same notification to many tokens.
    ///
    /// Per-token failures are reported in the returned mapping; only target
    /// resolution fails the call.
    pub async fn send_bulk(
        &self,
        tokens: &[String],
        intent: &NotificationIntent,
        application_id: Option<&str>,
        credential: Option<Arc<Credential>>,
        topic: Option<&str>,
    ) -> Result<BTreeMap<String, String>, PushError> {
        let report = self
            .send_bulk_report(
                tokens,
                intent,
                application_id,
                credential,
                topic,
                &CancellationToken::new(),
            )
            .await?;
        Ok(report.descriptions())
    }

    /// Like [`send_bulk`](Self::send_bulk), with caller cancellation and the full report.
    pub async fn send_bulk_report(
        &self,
        tokens: &[String],
        intent: &NotificationIntent,
        application_id: Option<&str>,
        credential: Option<Arc<Credential>>,
        topic: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, PushError> {
        let target = self.credentials.target(application_id, credential, topic)?;
        let intents: Vec<NotificationIntent> =
            tokens.iter().map(|token| intent.for_token(token)).collect();

        Ok(self.engine.send_batch(&target, &intents, cancel).await)
    }
}
