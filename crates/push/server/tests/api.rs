//! HTTP API against a stub transport and a temporary database.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use push_apns::{ApnsClient, ClientSettings, Transport};
use push_core::{Credential, Endpoint, Payload, ProviderResponse, PushError, RetryPolicy, Target};
use push_server::AppState;
use push_server::api::{BulkPushResponse, ErrorResponse, PushResponse};
use push_service::{Credentials, DeliveryConfig, DeliveryEngine, PushService, ResolvedApplication};
use push_storage::{DeviceStore as _, SqliteRegistry};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt as _;

#[derive(Default)]
struct StubTransport {
    sent: Mutex<Vec<Payload>>,
}

impl Transport for StubTransport {
    async fn send(
        &self,
        _target: &Target,
        payload: &Payload,
        _cancel: &CancellationToken,
    ) -> Result<ProviderResponse, PushError> {
        self.sent.lock().unwrap().push(payload.clone());
        match payload.token.as_str() {
            "xyz" => Ok(ProviderResponse::failure(410, "Unregistered")),
            "revoked" => Ok(ProviderResponse::failure(403, "InvalidProviderToken")),
            "slow" => Err(PushError::Timeout(Duration::from_secs(10))),
            token => Ok(ProviderResponse::success(format!("id-{token}"))),
        }
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    state: Arc<AppState<StubTransport>>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = dir.path().join("push.db");
        let registry = SqliteRegistry::open(url.to_str().unwrap()).unwrap();

        let credentials = Credentials::new(Some("app".to_string())).with_application(
            "app",
            ResolvedApplication {
                credential: Arc::new(Credential::token("unused", "KEY", "TEAM")),
                topic: "com.example.app".to_string(),
                endpoint: Endpoint::Sandbox,
            },
        );
        let engine = DeliveryEngine::new(
            StubTransport::default(),
            registry.clone(),
            DeliveryConfig {
                concurrency: 4,
                retry: RetryPolicy::none(),
            },
        );

        let state = Arc::new(AppState {
            service: PushService::new(engine, credentials),
            registry,
        });
        Self { _dir: dir, state }
    }

    async fn request(&self, method: &str, uri: &str, body: serde_json::Value) -> (StatusCode, Vec<u8>) {
        call(self.state.clone(), method, uri, body).await
    }

    fn sent_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .state
            .service
            .engine()
            .transport()
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.token.clone())
            .collect();
        tokens.sort();
        tokens
    }
}

async fn call<T>(
    state: Arc<AppState<T>>,
    method: &str,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, Vec<u8>)
where
    T: Transport + 'static,
{
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = push_server::router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

#[tokio::test]
async fn test_register_device() {
    let harness = Harness::new();
    let (status, _) = harness
        .request("PUT", "/v1/devices/abc?application_id=app", serde_json::Value::Null)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(harness.state.registry.is_active("abc").unwrap());
}

#[tokio::test]
async fn test_push_one() {
    let harness = Harness::new();
    let (status, body) = harness
        .request("POST", "/v1/push/abc", serde_json::json!({"alert": "Hello", "badge": 3}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let response: PushResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response.apns_id.as_deref(), Some("id-abc"));

    let sent = harness.state.service.engine().transport().sent.lock().unwrap();
    assert_eq!(sent[0].body, br#"{"aps":{"alert":"Hello","badge":3}}"#);
}

#[tokio::test]
async fn test_push_one_invalid_token() {
    let harness = Harness::new();
    harness.state.registry.register("xyz", Some("app")).unwrap();

    let (status, body) = harness
        .request("POST", "/v1/push/xyz", serde_json::json!({"alert": "Hello"}))
        .await;
    assert_eq!(status, StatusCode::GONE);

    let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.error, "Unregistered");
    assert!(!harness.state.registry.is_active("xyz").unwrap());
}

#[tokio::test]
async fn test_push_one_error_statuses() {
    let harness = Harness::new();

    let (status, _) = harness
        .request("POST", "/v1/push/slow", serde_json::json!({"alert": "Hello"}))
        .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);

    let (status, _) = harness
        .request("POST", "/v1/push/revoked", serde_json::json!({"alert": "Hello"}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_push_rejects_bad_alert() {
    let harness = Harness::new();
    let (status, body) = harness
        .request("POST", "/v1/push/abc", serde_json::json!({"alert": [1, 2]}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.error, "InvalidIntent");
    assert!(harness.sent_tokens().is_empty());
}

#[tokio::test]
async fn test_push_unknown_application() {
    let harness = Harness::new();
    let (status, _) = harness
        .request(
            "POST",
            "/v1/push/abc",
            serde_json::json!({"alert": "Hello", "application_id": "nope"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(harness.sent_tokens().is_empty());
}

#[tokio::test]
async fn test_push_bulk_explicit_tokens() {
    let harness = Harness::new();
    let (status, body) = harness
        .request(
            "POST",
            "/v1/push",
            serde_json::json!({"tokens": ["abc", "xyz", "xyz"], "alert": "Hello"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let response: BulkPushResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.results["abc"], "Success");
    assert_eq!(response.results["xyz"], "Unregistered");
}

#[tokio::test]
async fn test_push_bulk_active_devices() {
    let harness = Harness::new();
    harness.state.registry.register("abc", Some("app")).unwrap();
    harness.state.registry.register("xyz", Some("app")).unwrap();
    harness.state.registry.register("def", Some("app")).unwrap();
    harness.state.registry.register("other", Some("elsewhere")).unwrap();

    let (status, body) = harness
        .request(
            "POST",
            "/v1/push",
            serde_json::json!({"alert": "Hello", "application_id": "app"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let response: BulkPushResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response.results.len(), 3);
    assert_eq!(harness.sent_tokens(), vec!["abc", "def", "xyz"]);

    assert_eq!(
        harness.state.registry.active_tokens(Some("app")).unwrap(),
        vec!["abc", "def"]
    );
}

#[tokio::test]
async fn test_push_bulk_defaults_to_resolved_application() {
    let harness = Harness::new();
    harness.state.registry.register("abc", Some("app")).unwrap();
    harness.state.registry.register("other", Some("elsewhere")).unwrap();

    let (status, body) = harness
        .request("POST", "/v1/push", serde_json::json!({"alert": "Hello"}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let response: BulkPushResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results["abc"], "Success");
    assert_eq!(harness.sent_tokens(), vec!["abc"]);
}

#[tokio::test]
async fn test_router_serves_apns_client() {
    let dir = tempfile::tempdir().unwrap();
    let url = dir.path().join("push.db");
    let registry = SqliteRegistry::open(url.to_str().unwrap()).unwrap();

    let engine = DeliveryEngine::new(
        ApnsClient::new(ClientSettings::default()),
        registry.clone(),
        DeliveryConfig::default(),
    );
    let state = Arc::new(AppState {
        service: PushService::new(engine, Credentials::default()),
        registry,
    });

    let (status, _) = call(state.clone(), "PUT", "/v1/devices/abc", serde_json::Value::Null).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // No applications are configured, so nothing reaches the network.
    let (status, _) = call(state, "POST", "/v1/push", serde_json::json!({"alert": "Hello"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
