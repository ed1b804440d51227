//! Caller-visible errors.

use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::admission::ceil_secs;

/// The only failures a caller ever sees. Backend trouble is absorbed by
/// fallback responses and never shows up here.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limit exceeded, retry in {} seconds", retry_after_secs(.retry_after))]
    RateLimited { retry_after: Duration },
}

/// Whole seconds until a retry may succeed; never zero.
fn retry_after_secs(retry_after: &Duration) -> u64 {
    ceil_secs(*retry_after).max(1)
}

pub type Result<T> = std::result::Result<T, ServiceError>;

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        match &self {
            ServiceError::InvalidRequest(_) => {
                let body = Json(json!({
                    "error": {
                        "type": "invalid_request",
                        "message": self.to_string()
                    }
                }));
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            ServiceError::RateLimited { retry_after } => {
                let secs = retry_after_secs(retry_after);
                let body = Json(json!({
                    "error": {
                        "type": "rate_limited",
                        "message": self.to_string(),
                        "retry_after_secs": secs
                    }
                }));
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, secs.to_string())],
                    body,
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_request_status() {
        let response = ServiceError::InvalidRequest("message is empty".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_rate_limited_rounds_retry_after_up() {
        let response = ServiceError::RateLimited {
            retry_after: Duration::from_millis(1200),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }

    #[test]
    fn test_rate_limited_never_zero() {
        let response = ServiceError::RateLimited {
            retry_after: Duration::from_millis(1),
        }
        .into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }
}
