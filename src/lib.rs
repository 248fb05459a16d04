pub mod adapter;
pub mod backend;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use tracing::info;

use adapter::Enhancer;
use config::{ConfigStore, ServerSettings};

pub fn build_state(settings: &ServerSettings) -> Result<state::AppState, std::io::Error> {
    let transport = settings.transport().map_err(std::io::Error::other)?;
    let store = ConfigStore::new(settings.config_path.clone());
    let config = store.load_or_default();
    info!(
        provider = %config.provider,
        model = %config.model,
        config_path = %store.path().display(),
        "enhancer configured"
    );
    Ok(state::AppState::new(Enhancer::new(config, transport), store))
}

pub fn build_app(state: state::AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .route("/v1/enhance", post(handlers::enhance))
        .route("/v1/enhance/stream", post(handlers::enhance_stream))
        .route(
            "/v1/settings",
            get(handlers::get_settings).put(handlers::put_settings),
        )
        .with_state(state)
}
