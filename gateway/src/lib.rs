//! HTTP surface of the command portal.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{routing::get, Router};
use jsonwebtoken::DecodingKey;
use portal_core::portal::Portal;
use tower_http::trace::TraceLayer;

// Everything a handler needs, cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub portal: Arc<Portal>,
    pub jwt_key: Arc<DecodingKey>,
}

impl AppState {
    pub fn new(portal: Portal, jwt_secret: &[u8]) -> Self {
        Self {
            portal: Arc::new(portal),
            jwt_key: Arc::new(DecodingKey::from_secret(jwt_secret)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::home).post(handlers::submit))
        .route("/requests", get(handlers::list_requests))
        .route("/results", get(handlers::download_results))
        .route("/logs", get(handlers::download_logs))
        .route("/api-description", get(handlers::api_description))
        .route("/health", get(handlers::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
