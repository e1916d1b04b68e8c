//! Admission API: authenticated, quota-gated, rate-limited submission,
//! listing, and deletion of stores. Handlers only touch the registry and
//! the broker; the long external waits all live in the worker.

use axum::http::{header, HeaderValue, Method};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

pub mod auth_routes;
pub mod error;
pub mod extract;
pub mod schemas;
pub mod store_routes;

pub use error::{ApiError, ErrorResponse};

use crate::config::Config;
use crate::metrics;
use crate::worker::TaskQueue;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub cfg: Arc<Config>,
    pub queue: TaskQueue,
}

/// Liveness probe
async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Prometheus metrics in text format
async fn metrics_endpoint() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        metrics::render(),
    )
}

fn cors_layer(cfg: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .api
        .origins()
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "skipping unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Assemble the API router.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.cfg);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/auth/register", post(auth_routes::register))
        .route("/auth/login", post(auth_routes::login))
        .route(
            "/stores",
            post(store_routes::create_store).get(store_routes::list_stores),
        )
        .route(
            "/stores/{store_id}",
            get(store_routes::get_store).delete(store_routes::delete_store),
        )
        .route("/stores/{store_id}/health", get(store_routes::store_health))
        .layer(cors)
        .with_state(state)
}
