//! REST API handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use push_apns::Transport;
use push_core::{AlertContent, NotificationIntent, Priority, PushError, Sound};
use push_storage::DeviceStore as _;
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Query parameters for device registration.
#[derive(Debug, Default, Deserialize)]
pub struct RegisterParams {
    pub application_id: Option<String>,
}

/// Notification fields as sent by API clients.
#[derive(Debug, Default, Deserialize)]
pub struct PushRequest {
    /// Kept raw so unsupported alert shapes are rejected by the builder.
    #[serde(default)]
    pub alert: serde_json::Value,
    pub badge: Option<u32>,
    pub sound: Option<Sound>,
    pub thread_id: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub content_available: bool,
    #[serde(default)]
    pub mutable_content: bool,
    pub loc_key: Option<String>,
    pub priority: Option<u8>,
    /// Unix seconds.
    pub expiration: Option<i64>,
    pub collapse_id: Option<String>,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
    pub application_id: Option<String>,
    /// Overrides the application's configured topic.
    pub topic: Option<String>,
}

impl PushRequest {
    /// Convert to an intent without a token.
    pub fn intent(&self) -> Result<NotificationIntent, PushError> {
        let expiration = self
            .expiration
            .map(|secs| {
                DateTime::<Utc>::from_timestamp(secs, 0)
                    .ok_or_else(|| PushError::InvalidIntent(format!("invalid expiration {secs}")))
            })
            .transpose()?;

        Ok(NotificationIntent {
            alert: AlertContent::from_json(self.alert.clone())?,
            badge: self.badge,
            sound: self.sound.clone(),
            thread_id: self.thread_id.clone(),
            category: self.category.clone(),
            content_available: self.content_available,
            mutable_content: self.mutable_content,
            loc_key: self.loc_key.clone(),
            priority: self.priority.map(Priority::try_from).transpose()?,
            expiration,
            collapse_id: self.collapse_id.clone(),
            extra: self.extra.clone(),
            ..Default::default()
        })
    }
}

/// Bulk push body. An empty token list targets every active device of the
/// resolved application.
#[derive(Debug, Default, Deserialize)]
pub struct BulkPushRequest {
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(flatten)]
    pub notification: PushRequest,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PushResponse {
    pub apns_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkPushResponse {
    pub results: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Handler error.
#[derive(Debug)]
pub enum ApiError {
    Push(PushError),
    Internal(color_eyre::eyre::Report),
}

impl From<PushError> for ApiError {
    fn from(e: PushError) -> Self {
        Self::Push(e)
    }
}

impl From<color_eyre::eyre::Report> for ApiError {
    fn from(e: color_eyre::eyre::Report) -> Self {
        Self::Internal(e)
    }
}

/// HTTP status for a delivery error.
pub fn status_for(err: &PushError) -> StatusCode {
    match err {
        PushError::InvalidIntent(_) | PushError::Configuration(_) => StatusCode::BAD_REQUEST,
        PushError::Authentication { .. } => StatusCode::UNAUTHORIZED,
        PushError::InvalidToken { .. } => StatusCode::GONE,
        PushError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        PushError::Transient { .. }
        | PushError::Permanent { .. }
        | PushError::Transport(_)
        | PushError::Cancelled => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Push(e) => {
                let body = ErrorResponse {
                    error: e.reason(),
                    message: e.to_string(),
                };
                (status_for(&e), Json(body)).into_response()
            }
            Self::Internal(e) => {
                tracing::error!(error = ?e, "request failed");
                let body = ErrorResponse {
                    error: "Internal".to_string(),
                    message: "internal server error".to_string(),
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

/// Register or reactivate a device token.
pub async fn register_device<T>(
    State(state): State<Arc<AppState<T>>>,
    Path(token): Path<String>,
    Query(params): Query<RegisterParams>,
) -> Result<StatusCode, ApiError>
where
    T: Transport,
{
    state
        .registry
        .register(&token, params.application_id.as_deref())?;
    tracing::info!(application_id = ?params.application_id, "device registered");
    Ok(StatusCode::NO_CONTENT)
}

/// Push to one device.
pub async fn push_one<T>(
    State(state): State<Arc<AppState<T>>>,
    Path(token): Path<String>,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>, ApiError>
where
    T: Transport,
{
    let intent = request.intent()?;
    let delivered = state
        .service
        .send_one(
            &token,
            &intent,
            request.application_id.as_deref(),
            None,
            request.topic.as_deref(),
        )
        .await?;

    Ok(Json(PushResponse {
        apns_id: delivered.apns_id,
    }))
}

/// Push to many devices.
pub async fn push_bulk<T>(
    State(state): State<Arc<AppState<T>>>,
    Json(request): Json<BulkPushRequest>,
) -> Result<Json<BulkPushResponse>, ApiError>
where
    T: Transport,
{
    let intent = request.notification.intent()?;
    let application_id = state
        .service
        .credentials()
        .application_id(request.notification.application_id.as_deref())?
        .to_string();

    let tokens = if request.tokens.is_empty() {
        state.registry.active_tokens(Some(&application_id))?
    } else {
        request.tokens
    };

    let results = state
        .service
        .send_bulk(
            &tokens,
            &intent,
            Some(&application_id),
            None,
            request.notification.topic.as_deref(),
        )
        .await?;

    Ok(Json(BulkPushResponse { results }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_to_intent() {
        let request: PushRequest = serde_json::from_value(serde_json::json!({
            "alert": {"title": "Hi", "body": "There"},
            "badge": 2,
            "sound": "default",
            "priority": 5,
            "expiration": 1_700_000_000,
            "extra": {"order_id": 7}
        }))
        .unwrap();

        let intent = request.intent().unwrap();
        assert!(matches!(intent.alert, Some(AlertContent::Structured(_))));
        assert_eq!(intent.badge, Some(2));
        assert_eq!(intent.sound, Some(Sound::from("default")));
        assert_eq!(intent.priority, Some(Priority::ConservePower));
        assert_eq!(intent.expiration.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(intent.extra["order_id"], 7);
    }

    #[test]
    fn test_bad_alert_rejected() {
        let request: PushRequest =
            serde_json::from_value(serde_json::json!({"alert": 42})).unwrap();
        assert!(matches!(request.intent(), Err(PushError::InvalidIntent(_))));
    }

    #[test]
    fn test_bad_priority_rejected() {
        let request: PushRequest =
            serde_json::from_value(serde_json::json!({"priority": 7})).unwrap();
        assert!(matches!(request.intent(), Err(PushError::InvalidIntent(_))));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&PushError::InvalidToken {
                reason: "Unregistered".into()
            }),
            StatusCode::GONE
        );
        assert_eq!(
            status_for(&PushError::Timeout(std::time::Duration::from_secs(1))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&PushError::Authentication {
                reason: "BadCertificate".into()
            }),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(&PushError::Transport("reset".into())),
            StatusCode::BAD_GATEWAY
        );
    }
}
