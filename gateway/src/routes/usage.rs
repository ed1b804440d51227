use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, routing::get, Json, Router};

use crate::account::Account;
use crate::admission::UsageStats;
use crate::error::Result;
use crate::AppState;

/// GET /v1/usage - the caller's quota in the current window.
async fn usage(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UsageStats>> {
    let account = Account::from_headers(&headers)?;
    let stats = state.service.admission().usage(&account.id, account.tier).await;
    Ok(Json(stats))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/usage", get(usage))
        .with_state(state)
}
