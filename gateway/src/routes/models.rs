use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use relay_common::AdapterState;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub use_case: &'static str,
    /// Absent for `auto`, which is not a backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<AdapterState>,
}

/// GET /v1/models - automatic selection plus every backend.
async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    let mut models = vec![ModelInfo {
        id: "auto",
        name: "Auto",
        description: "Picks a backend from the content of each request",
        use_case: "Any request",
        state: None,
    }];

    for (backend, adapter_state) in state.service.registry().states().await {
        models.push(ModelInfo {
            id: backend.as_str(),
            name: backend.display_name(),
            description: backend.description(),
            use_case: backend.use_case(),
            state: Some(adapter_state),
        });
    }

    Json(ModelsResponse { models })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/models", get(list_models))
        .with_state(state)
}
