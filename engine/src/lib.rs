//! Generation backends for the relay.
//!
//! - [`engine`]: the `GenerationEngine` trait and the Ollama / llama.cpp engines
//! - [`adapter`]: per-backend lazy initialization and Ready/Degraded state
//! - [`registry`]: one adapter per [`relay_common::BackendId`]
//! - [`streaming`]: ordered, cancellable, fallback-aware response streams

pub mod adapter;
pub mod config;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod registry;
pub mod streaming;
pub mod test_util;

pub use adapter::{Adapter, AdapterPolicy, Generation};
pub use config::{BackendConfig, BackendsConfig, GenerationConfig, RegistryConfig, StreamingConfig};
pub use engine::{FragmentStream, GenerationEngine, GenerationOptions};
pub use error::{Error, Result};
pub use fallback::FallbackResponder;
pub use registry::BackendRegistry;
pub use streaming::{ResponseStream, StreamingEngine};
