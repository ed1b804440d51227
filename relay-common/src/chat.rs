//! Wire types exchanged with callers and with the persistence collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::BackendId;

/// Chat request body.
///
/// The account id and tier are not part of the body; the account layer in
/// front of the relay supplies them after authenticating the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Backend override (`"auto"` or absent means classify).
    #[serde(default, alias = "model")]
    pub backend: Option<String>,
    /// Earlier turns of the conversation, oldest first.
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// One earlier turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Non-streaming chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub backend_used: BackendId,
    /// Whether the response came from the fallback responder.
    pub fallback: bool,
}

/// Payload of a streamed `fragment` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentEvent {
    pub text: String,
}

/// Payload of the final `done` event of a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSummary {
    pub backend_used: BackendId,
    pub fragment_count: u64,
    pub fallback: bool,
}

/// Immutable record of a completed exchange, handed to the persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub account_id: String,
    pub backend_used: BackendId,
    pub response_text: String,
    pub token_count: u32,
    pub fallback: bool,
}

impl CompletionRecord {
    pub fn new(
        account_id: String,
        backend_used: BackendId,
        response_text: String,
        fallback: bool,
    ) -> Self {
        let token_count = response_text.split_whitespace().count() as u32;
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            account_id,
            backend_used,
            response_text,
            token_count,
            fallback,
        }
    }
}
