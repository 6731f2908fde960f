//! Push Server
//!
//! HTTP API for device registration and notification delivery.

pub mod api;

use std::sync::Arc;

use axum::Router;
use push_apns::Transport;
use push_service::{Credentials, PushService};
use push_storage::SqliteRegistry;

/// Shared handler state.
pub struct AppState<T> {
    pub service: PushService<T, SqliteRegistry, Credentials>,
    pub registry: SqliteRegistry,
}

/// Create the API router.
pub fn router<T>(state: Arc<AppState<T>>) -> Router
where
    T: Transport + 'static,
{
    use axum::routing::{post, put};

    Router::new()
        .route("/v1/devices/{token}", put(api::register_device::<T>))
        .route("/v1/push/{token}", post(api::push_one::<T>))
        .route("/v1/push", post(api::push_bulk::<T>))
        .with_state(state)
}
