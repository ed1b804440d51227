//! Generation engine abstraction layer.
//!
//! This module defines the `GenerationEngine` trait that abstracts different
//! generation backends (Ollama, llama.cpp, ...) behind a common interface.
//! Adapters own an engine and add lifecycle state and fallback on top.

mod lines;
mod llama_cpp;
mod ollama;

pub use llama_cpp::LlamaCppEngine;
pub use ollama::OllamaEngine;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;
use relay_common::Fragment;

use crate::config::{BackendConfig, GenerationConfig};
use crate::error::Result;

/// Fragments produced by an engine, in generation order.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment>> + Send>>;

/// Per-request generation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Sequences that end generation when produced.
    pub stop: Vec<String>,
}

impl GenerationOptions {
    /// Options from configured defaults, overridden per request where given.
    pub fn from_defaults(
        defaults: &GenerationConfig,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        Self {
            max_tokens: max_tokens.unwrap_or(defaults.max_tokens),
            temperature: temperature.unwrap_or(defaults.temperature),
            stop: default_stop_sequences(),
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::from_defaults(&GenerationConfig::default(), None, None)
    }
}

/// Transcript markers that mean the model started writing the next user turn.
fn default_stop_sequences() -> Vec<String> {
    vec!["User:".to_string(), "\n\nUser:".to_string()]
}

/// Primary trait for generation engines.
///
/// `load` acquires the underlying resource; it is called at most once per
/// initialization attempt, never per request.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Unique identifier for this engine type (e.g., "ollama", "llama_cpp").
    fn engine_type(&self) -> &'static str;

    /// Acquire the underlying resource (model file, server, remote model).
    async fn load(&self) -> Result<()>;

    /// Generate a whole response.
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;

    /// Start generating and return the fragments as they are produced.
    ///
    /// Dropping the returned stream must release the generation in flight.
    async fn stream(&self, prompt: &str, options: &GenerationOptions) -> Result<FragmentStream>;

    /// Release the resource acquired by `load`.
    async fn shutdown(&self) {}
}

/// Build the engine described by a backend's configuration.
pub fn from_config(config: &BackendConfig) -> Arc<dyn GenerationEngine> {
    match config {
        BackendConfig::Ollama(ollama) => Arc::new(OllamaEngine::new(ollama.clone())),
        BackendConfig::LlamaCpp(llama) => Arc::new(LlamaCppEngine::new(llama.clone())),
    }
}
