//! Batch delivery with retry and invalid-token reporting.

use std::collections::{BTreeMap, BTreeSet};

use futures::StreamExt as _;
use push_apns::Transport;
use push_core::{
    Delivered, NotificationIntent, Outcome, ProviderResponse, PushError, RetryPolicy, Target,
    build_payload, token_prefix,
};
use push_storage::DeviceRegistry;
use tokio_util::sync::CancellationToken;

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Entries of one batch in flight at once.
    pub concurrency: usize,
    /// Retry policy for transient provider failures and timeouts.
    pub retry: RetryPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            concurrency: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-token results of one batch, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub outcomes: Vec<(String, Outcome)>,
    /// Distinct tokens reported to the registry.
    pub deactivated: BTreeSet<String>,
}

impl BatchReport {
    /// Outcome of the first entry for `token`.
    pub fn outcome(&self, token: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, outcome)| outcome)
    }

    /// Token to outcome description. With repeated tokens the last entry wins.
    pub fn descriptions(&self) -> BTreeMap<String, String> {
        self.outcomes
            .iter()
            .map(|(token, outcome)| (token.clone(), outcome.description().to_string()))
            .collect()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_success()).count()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Builds, sends, retries, and classifies notifications.
pub struct DeliveryEngine<T, R> {
    transport: T,
    registry: R,
    config: DeliveryConfig,
}

impl<T: Transport, R: DeviceRegistry> DeliveryEngine<T, R> {
    /// Create a new engine.
    pub fn new(transport: T, registry: R, config: DeliveryConfig) -> Self {
        Self {
            transport,
            registry,
            config,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Deliver one notification, retrying transient failures.
    ///
    /// Returns the terminal classified result. Registry side effects are left to the caller.
    pub async fn deliver(
        &self,
        target: &Target,
        intent: &NotificationIntent,
        cancel: &CancellationToken,
    ) -> Result<Delivered, PushError> {
        let payload = build_payload(intent)?;
        let policy = self.config.retry;
        let mut retries = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(PushError::Cancelled);
            }

            let result = self
                .transport
                .send(target, &payload, cancel)
                .await
                .and_then(ProviderResponse::classify);

            match result {
                Err(err) if err.is_retryable() && policy.allows(retries) => {
                    let delay = policy.delay(retries);
                    retries += 1;
                    tracing::debug!(
                        token = token_prefix(&intent.token),
                        attempt = retries,
                        reason = %err.reason(),
                        delay = ?delay,
                        "retrying notification"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(PushError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => {
                    tracing::debug!(
                        token = token_prefix(&intent.token),
                        attempts = retries + 1,
                        reason = %err.reason(),
                        "notification failed"
                    );
                    return Err(err);
                }
                Ok(delivered) => return Ok(delivered),
            }
        }
    }

    /// Deliver a batch with bounded concurrency.
    ///
    /// Never fails as a whole. An authentication failure cancels the rest of the
    /// batch. Each distinct invalid token is reported to the registry once,
    /// after all entries finish.
    pub async fn send_batch(
        &self,
        target: &Target,
        intents: &[NotificationIntent],
        cancel: &CancellationToken,
    ) -> BatchReport {
        let batch = cancel.child_token();
        let batch = &batch;

        // Indices rather than borrowed items keep the stream future `Send`.
        let mut results: Vec<(usize, Outcome)> = futures::stream::iter(0..intents.len())
            .map(|index| async move {
                (index, self.deliver_entry(target, &intents[index], batch).await)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        let outcomes: Vec<(String, Outcome)> = results
            .into_iter()
            .map(|(index, outcome)| (intents[index].token.clone(), outcome))
            .collect();

        let invalid: BTreeSet<String> = outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_invalid_token())
            .map(|(token, _)| token.clone())
            .collect();
        for token in &invalid {
            self.deactivate(token);
        }

        let report = BatchReport {
            outcomes,
            deactivated: invalid,
        };
        tracing::info!(
            topic = %target.topic,
            total = report.len(),
            succeeded = report.succeeded(),
            deactivated = report.deactivated.len(),
            "batch finished"
        );
        report
    }

    async fn deliver_entry(
        &self,
        target: &Target,
        intent: &NotificationIntent,
        batch: &CancellationToken,
    ) -> Outcome {
        if batch.is_cancelled() {
            return Outcome::Cancelled;
        }

        let result = self.deliver(target, intent, batch).await;
        if let Err(PushError::Authentication { reason }) = &result {
            tracing::error!(topic = %target.topic, reason = %reason, "provider rejected credentials, cancelling batch");
            batch.cancel();
        }
        Outcome::from(result)
    }

    /// Report an invalid token. Registry errors are logged, not returned.
    pub fn deactivate(&self, token: &str) {
        if let Err(e) = self.registry.deactivate(token) {
            tracing::warn!(token = token_prefix(token), error = %e, "failed to deactivate device");
        }
    }
}
