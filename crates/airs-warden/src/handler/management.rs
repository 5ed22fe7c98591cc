//! Management Service
//!
//! Publishes liveness and the process's signing keys as a JWK set, so that
//! upstream services can verify tokens minted by the jwt finalizer.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};

// Layer 3: Internal module imports
use crate::app::keys::KeyRegistry;

/// Build the management service router
pub fn router(key_registry: Arc<KeyRegistry>) -> Router {
    Router::new()
        .route("/.well-known/health", get(health))
        .route("/.well-known/jwks", get(jwks))
        .with_state(key_registry)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn jwks(State(key_registry): State<Arc<KeyRegistry>>) -> Json<Value> {
    Json(key_registry.jwks())
}
