//! Relay Common Types
//!
//! Shared types used by both the relay engine and the gateway.

pub mod backend;
pub mod category;
pub mod chat;
pub mod fragment;
pub mod tier;

pub use backend::{AdapterState, BackendId};
pub use category::Category;
pub use chat::{
    ChatRequest, ChatResponse, ChatTurn, CompletionRecord, FragmentEvent, StreamSummary,
};
pub use fragment::{Fragment, StreamEvent, StreamOutcome};
pub use tier::Tier;
