//! Operations HTTP API.
//!
//! Routes:
//! - `GET    /health`
//! - `GET    /metrics`
//! - `GET    /modules[?category=]`
//! - `GET    /modules/categories`
//! - `POST   /modules/:id/run`
//! - `GET    /modules/:id/runs[?limit=]`
//! - `GET    /modules/:id/config`, `PUT /modules/:id/config`
//! - `DELETE /cache[?module_id=]`
//! - `DELETE /cache/expired`

pub mod cache;
pub mod health;
pub mod modules;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::metrics::AppMetrics;
use crate::runner::ModuleRunner;

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<ModuleRunner>,
    pub metrics: Arc<AppMetrics>,
}

/// Assemble the full router (shared by `main.rs` and the integration tests).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .route("/modules", get(modules::list_modules))
        .route("/modules/categories", get(modules::list_categories))
        .route("/modules/:id/run", post(modules::run_module))
        .route("/modules/:id/runs", get(modules::list_runs))
        .route(
            "/modules/:id/config",
            get(modules::get_config).put(modules::put_config),
        )
        .route("/cache", delete(cache::clear_cache))
        .route("/cache/expired", delete(cache::clear_expired))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
