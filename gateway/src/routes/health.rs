use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use relay_common::{AdapterState, BackendId};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    backends: Vec<BackendHealth>,
}

#[derive(Serialize)]
struct BackendHealth {
    backend: BackendId,
    state: AdapterState,
}

/// GET /health - liveness plus the state of every backend.
///
/// Degraded backends still answer with fallback text, so the relay itself
/// reports "ok" regardless.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let backends = state
        .service
        .registry()
        .states()
        .await
        .into_iter()
        .map(|(backend, state)| BackendHealth { backend, state })
        .collect();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        backends,
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}
