use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    routing::post,
    Json, Router,
};
use futures_util::{future, Stream, StreamExt};
use relay_common::{ChatRequest, ChatResponse, FragmentEvent, StreamEvent, StreamSummary};

use crate::account::Account;
use crate::error::{Result, ServiceError};
use crate::service::InferenceRequest;
use crate::AppState;

/// POST /v1/chat - whole response in one body.
async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>> {
    let account = Account::from_headers(&headers)?;
    let request = InferenceRequest::from_chat(parse_body(body)?, account.id, account.tier)?;

    let completion = state.service.complete(request).await?;
    Ok(Json(completion.into()))
}

/// POST /v1/chat/stream - `fragment` events in order, then one `done` event.
async fn chat_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let account = Account::from_headers(&headers)?;
    let request = InferenceRequest::from_chat(parse_body(body)?, account.id, account.tier)?;

    let stream = state.service.stream(request).await?;
    let events = stream.filter_map(|event| future::ready(sse_event(event)));

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// Malformed bodies surface as `invalid_request` like any other bad input.
fn parse_body(body: std::result::Result<Json<ChatRequest>, JsonRejection>) -> Result<ChatRequest> {
    body.map(|Json(request)| request)
        .map_err(|rejection| ServiceError::InvalidRequest(rejection.body_text()))
}

fn sse_event(event: StreamEvent) -> Option<std::result::Result<Event, Infallible>> {
    let (name, data) = match event {
        StreamEvent::Fragment(fragment) => (
            "fragment",
            serde_json::to_string(&FragmentEvent {
                text: fragment.text,
            }),
        ),
        StreamEvent::End(outcome) => (
            "done",
            serde_json::to_string(&StreamSummary {
                backend_used: outcome.backend,
                fragment_count: outcome.emitted_fragments,
                fallback: outcome.fallback_fired,
            }),
        ),
    };

    match data {
        Ok(data) => Some(Ok(Event::default().event(name).data(data))),
        Err(e) => {
            tracing::warn!(event = name, error = %e, "Failed to serialize stream event");
            None
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat", post(chat))
        .route("/v1/chat/stream", post(chat_stream))
        .with_state(state)
}
