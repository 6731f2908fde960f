//! Push Server - APNs delivery over HTTP.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use color_eyre::eyre::WrapErr as _;
use push_apns::ApnsClient;
use push_service::{Config, DeliveryEngine, PushService};
use push_storage::SqliteRegistry;
use push_server::AppState;
use tower_http::trace::TraceLayer;

const EVICT_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("push-server starting");

    let config_path = Config::config_path();
    let config = Config::load_from(&config_path)
        .wrap_err_with(|| format!("failed to load config from {}", config_path.display()))?;
    let credentials = config
        .credentials()
        .wrap_err("failed to load application credentials")?;

    let registry = SqliteRegistry::open(&config.server.database_url)
        .wrap_err("failed to initialize storage")?;

    let client = ApnsClient::new(config.delivery.client_settings());
    let engine = DeliveryEngine::new(client, registry.clone(), config.delivery.engine_config());
    let state = Arc::new(AppState {
        service: PushService::new(engine, credentials),
        registry,
    });

    let evict_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EVICT_INTERVAL);
        loop {
            interval.tick().await;
            let evicted = evict_state
                .service
                .engine()
                .transport()
                .pool()
                .evict_idle()
                .await;
            if evicted > 0 {
                tracing::debug!(evicted, "closed idle provider connections");
            }
        }
    });

    let app = Router::new()
        .merge(push_server::router(state))
        .layer(TraceLayer::new_for_http());

    let addr = config.server.bind;
    tracing::info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err("failed to bind")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
