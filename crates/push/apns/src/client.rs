//! APNs provider client.

use std::time::Duration;

use bytes::Bytes;
use push_core::{Payload, ProviderResponse, PushError, RetryPolicy, Target, token_prefix};
use tokio_util::sync::CancellationToken;

use crate::{ConnectionPool, Connector, PoolSettings, StreamDispatcher, TlsConnector, TokenCache, Transport};

/// Client tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    pub pool: PoolSettings,
    /// Per-request deadline, slot wait included.
    pub request_timeout: Duration,
    /// Reconnect-and-resend policy for transport failures.
    pub transport_retry: RetryPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            pool: PoolSettings::default(),
            request_timeout: Duration::from_secs(10),
            transport_retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(5),
                jitter: true,
            },
        }
    }
}

/// Sends payloads over pooled HTTP/2 connections.
pub struct ApnsClient<C> {
    pool: ConnectionPool<C>,
    dispatcher: StreamDispatcher,
    tokens: TokenCache,
    settings: ClientSettings,
}

impl ApnsClient<TlsConnector> {
    /// Create a client that reaches the provider over TLS.
    pub fn new(settings: ClientSettings) -> Self {
        Self::with_connector(TlsConnector::new(settings.pool.connect_timeout), settings)
    }
}

impl<C: Connector> ApnsClient<C> {
    /// Create a client over a custom connector.
    pub fn with_connector(connector: C, settings: ClientSettings) -> Self {
        Self {
            pool: ConnectionPool::new(connector, settings.pool),
            dispatcher: StreamDispatcher::new(settings.request_timeout),
            tokens: TokenCache::new(),
            settings,
        }
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Build the provider request for a payload. Returns the request and its `apns-id`.
    pub fn build_request(
        &self,
        target: &Target,
        payload: &Payload,
    ) -> Result<(http::Request<()>, String), PushError> {
        let apns_id = uuid::Uuid::new_v4().to_string();
        let uri = format!(
            "https://{}/3/device/{}",
            target.endpoint.host(),
            payload.token
        );

        let mut builder = http::Request::builder()
            .method(http::Method::POST)
            .uri(uri)
            .header("apns-push-type", payload.push_type.as_str())
            .header("apns-topic", target.topic.as_str())
            .header("apns-id", apns_id.as_str());

        if let Some(priority) = payload.priority {
            builder = builder.header("apns-priority", priority.as_u8().to_string());
        }
        if let Some(expiration) = payload.expiration_header(chrono::Utc::now()) {
            builder = builder.header("apns-expiration", expiration.to_string());
        }
        if let Some(collapse_id) = &payload.collapse_id {
            builder = builder.header("apns-collapse-id", collapse_id.as_str());
        }
        if let Some(jwt) = self.tokens.bearer(&target.credential)? {
            builder = builder.header(http::header::AUTHORIZATION, format!("bearer {jwt}"));
        }

        let request = builder
            .body(())
            .map_err(|e| PushError::InvalidIntent(format!("invalid request: {e}")))?;
        Ok((request, apns_id))
    }

    async fn send_once(
        &self,
        target: &Target,
        payload: &Payload,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, PushError> {
        let (request, apns_id) = self.build_request(target, payload)?;
        let conn = self.pool.acquire(target).await?;

        let result = self
            .dispatcher
            .send(
                &conn,
                request,
                Bytes::copy_from_slice(&payload.body),
                None,
                cancel,
            )
            .await;

        if matches!(result, Err(PushError::Transport(_))) || !conn.is_alive() {
            self.pool.invalidate(&conn).await;
        }

        let mut response = result?;
        if response.reason.as_deref() == Some("ExpiredProviderToken") {
            tracing::info!(topic = %target.topic, "provider token expired, re-signing");
            self.tokens.invalidate(&target.credential);
        }
        response.apns_id.get_or_insert(apns_id);
        Ok(response)
    }
}

impl<C: Connector> Transport for ApnsClient<C> {
    async fn send(
        &self,
        target: &Target,
        payload: &Payload,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, PushError> {
        let policy = self.settings.transport_retry;
        let mut retries = 0;

        loop {
            match self.send_once(target, payload, cancel).await {
                Err(PushError::Transport(reason)) if policy.allows(retries) => {
                    let delay = policy.delay(retries);
                    retries += 1;
                    tracing::warn!(
                        token = token_prefix(&payload.token),
                        attempt = retries,
                        reason = %reason,
                        delay = ?delay,
                        "transport failure, resending on a fresh connection"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(PushError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use push_core::{Credential, Endpoint, NotificationIntent, Priority, build_payload};
    use std::sync::Arc;

    const KEY: &str = include_str!("../tests/fixtures/auth_key.p8");

    fn header<'a>(request: &'a http::Request<()>, name: &str) -> Option<&'a str> {
        request.headers().get(name).and_then(|v| v.to_str().ok())
    }

    #[test]
    fn test_build_request_headers() {
        let client = ApnsClient::new(ClientSettings::default());
        let credential = Arc::new(Credential::token(KEY, "ABC123DEFG", "TEAM123456"));
        let target = Target::new(credential, "com.example.app", Endpoint::Sandbox);
        let intent = NotificationIntent::new("abcd1234")
            .with_alert("Hello")
            .with_priority(Priority::Immediate)
            .with_collapse_id("group-1");
        let payload = build_payload(&intent).unwrap();

        let (request, apns_id) = client.build_request(&target, &payload).unwrap();
        assert_eq!(request.method(), http::Method::POST);
        assert_eq!(
            request.uri().to_string(),
            "https://api.sandbox.push.apple.com/3/device/abcd1234"
        );
        assert_eq!(header(&request, "apns-push-type"), Some("alert"));
        assert_eq!(header(&request, "apns-topic"), Some("com.example.app"));
        assert_eq!(header(&request, "apns-priority"), Some("10"));
        assert_eq!(header(&request, "apns-collapse-id"), Some("group-1"));
        assert_eq!(header(&request, "apns-id"), Some(apns_id.as_str()));
        assert!(header(&request, "apns-expiration").is_none());
        assert!(header(&request, "authorization").unwrap().starts_with("bearer "));
    }

    #[test]
    fn test_certificate_request_has_no_bearer() {
        let client = ApnsClient::new(ClientSettings::default());
        let credential = Arc::new(Credential::certificate("unused"));
        let target = Target::new(credential, "com.example.app", Endpoint::Production);
        let payload = build_payload(&NotificationIntent::new("abcd")).unwrap();

        let (request, _) = client.build_request(&target, &payload).unwrap();
        assert!(header(&request, "authorization").is_none());
        assert_eq!(header(&request, "apns-push-type"), Some("background"));
        assert_eq!(header(&request, "apns-priority"), Some("5"));
    }

    #[test]
    fn test_expiration_header_is_absolute() {
        let client = ApnsClient::new(ClientSettings::default());
        let credential = Arc::new(Credential::certificate("unused"));
        let target = Target::new(credential, "com.example.app", Endpoint::Production);
        let expiration = chrono::Utc::now() + chrono::Duration::hours(1);
        let intent = NotificationIntent::new("abcd")
            .with_alert("hi")
            .with_expiration(expiration);
        let payload = build_payload(&intent).unwrap();

        let (request, _) = client.build_request(&target, &payload).unwrap();
        let sent: i64 = header(&request, "apns-expiration").unwrap().parse().unwrap();
        assert!((sent - expiration.timestamp()).abs() <= 1);
    }

    #[test]
    fn test_bad_token_path_rejected() {
        let client = ApnsClient::new(ClientSettings::default());
        let credential = Arc::new(Credential::certificate("unused"));
        let target = Target::new(credential, "com.example.app", Endpoint::Production);
        let payload = build_payload(&NotificationIntent::new("bad token")).unwrap();
        assert!(matches!(
            client.build_request(&target, &payload),
            Err(PushError::InvalidIntent(_))
        ));
    }

    #[tokio::test]
    async fn test_unusable_certificate_is_authentication_error() {
        let client = ApnsClient::new(ClientSettings::default());
        let credential = Arc::new(Credential::certificate("garbage"));
        let target = Target::new(credential, "com.example.app", Endpoint::Sandbox);
        let payload = build_payload(&NotificationIntent::new("abcd1234").with_alert("Hello")).unwrap();

        let result = client
            .send(&target, &payload, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(PushError::Authentication { .. })));
        assert_eq!(client.pool().live_connections().await, 0);
    }
}
