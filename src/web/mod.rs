//! HTTP surface: three GET endpoints wired onto shared camera state.

pub mod capture;
pub mod prompt;
pub mod stream;

use crate::config::Config;
use crate::gate::SensorGate;
use crate::periodic::PeriodicCapture;
use crate::sensor::ImageSensor;
use crate::settings::SettingsStore;
use crate::snapshot::Exporter;
use crate::storage::StorageMedium;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Everything the responders share. One instance per process.
pub struct AppState {
    pub sensor: Arc<dyn ImageSensor>,
    pub gate: Arc<SensorGate>,
    pub exporter: Arc<Exporter>,
    pub periodic: Arc<PeriodicCapture>,
    pub sd: Arc<dyn StorageMedium>,
    pub mmc: Arc<dyn StorageMedium>,
    pub settings: Arc<dyn SettingsStore>,
    pub config: Arc<Config>,
}

/// Builds the router with endpoint paths taken from the configuration.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.server.capture_path, get(capture::handler))
        .route(&state.config.server.stream_path, get(stream::handler))
        .route(&state.config.server.prompt_path, get(prompt::handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!(
        "{}:{}",
        state.config.server.bind, state.config.server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        addr = %addr,
        capture = %state.config.server.capture_path,
        stream = %state.config.server.stream_path,
        prompt = %state.config.server.prompt_path,
        "camera server listening"
    );
    axum::serve(listener, router(state)).await?;
    Ok(())
}
