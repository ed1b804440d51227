pub mod account;
pub mod admission;
pub mod classifier;
pub mod config;
pub mod error;
pub mod logging;
pub mod prompt;
pub mod records;
pub mod router;
pub mod routes;
pub mod service;
pub mod test_util;

pub use account::Account;
pub use admission::{Admission, AdmissionController, QuotaCounter, UsageStats};
pub use config::{Config, ConfigError};
pub use error::ServiceError;
pub use records::CompletionRecords;
pub use router::{Route, RouteTable};
pub use service::{Completion, InferenceRequest, RelayService, RelayStream};

use std::sync::Arc;

use axum::{middleware, Router};

/// Shared application state.
pub struct AppState {
    pub service: RelayService,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self {
            service: RelayService::from_config(config),
        }
    }
}

/// Build the HTTP application with every route and the request logger.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::health::router(state.clone()))
        .merge(routes::chat::router(state.clone()))
        .merge(routes::models::router(state.clone()))
        .merge(routes::usage::router(state))
        .layer(middleware::from_fn(logging::request_logger))
}
