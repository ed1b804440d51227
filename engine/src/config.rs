//! Configuration for backends, the registry and streaming.
//!
//! These types are deserialized as sections of the gateway's configuration
//! file; defaults live here so the engine crate can be used on its own.

use std::time::Duration;

use relay_common::BackendId;
use serde::Deserialize;

/// Which engine serves a backend, and where its resource lives.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "engine", rename_all = "snake_case")]
pub enum BackendConfig {
    Ollama(OllamaEngineConfig),
    LlamaCpp(LlamaCppEngineConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaEngineConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Model name as known to the Ollama server (e.g. "deepseek-coder:6.7b").
    pub model: String,
    /// Upper bound for a whole non-streaming generation.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// llama.cpp engine configuration.
///
/// The engine runs one llama-server subprocess serving a single model file.
#[derive(Debug, Clone, Deserialize)]
pub struct LlamaCppEngineConfig {
    /// Path to the .gguf model file.
    pub model_path: String,
    /// Path to the llama-server binary or wrapper command.
    #[serde(default = "default_server_binary")]
    pub server_binary: String,
    /// Extra arguments inserted BEFORE the model args (for wrapper commands).
    #[serde(default)]
    pub server_args: Vec<String>,
    /// Number of layers to offload to GPU (-ngl flag). 0 = CPU only.
    #[serde(default)]
    pub gpu_layers: Option<u32>,
    /// Context window size (-c flag).
    #[serde(default = "default_context_size")]
    pub context_size: u32,
    /// Worker threads (-t flag).
    #[serde(default)]
    pub threads: Option<u32>,
    /// Fixed port for the server. If not set, the OS assigns one.
    #[serde(default)]
    pub port: Option<u16>,
    /// Server startup timeout in seconds.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
    /// Server graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    /// Upper bound for a whole non-streaming completion.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Log llama-server stderr output for debugging.
    #[serde(default)]
    pub log_server_output: bool,
    /// Extra arguments appended AFTER the standard llama-server flags.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Engine assignment per backend. A missing entry leaves that backend
/// without a resource, so it runs degraded.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BackendsConfig {
    #[serde(default)]
    pub coder: Option<BackendConfig>,
    #[serde(default)]
    pub documents: Option<BackendConfig>,
    #[serde(default)]
    pub multimodal: Option<BackendConfig>,
    #[serde(default)]
    pub general: Option<BackendConfig>,
}

impl BackendsConfig {
    pub fn get(&self, id: BackendId) -> Option<&BackendConfig> {
        match id {
            BackendId::Coder => self.coder.as_ref(),
            BackendId::Documents => self.documents.as_ref(),
            BackendId::Multimodal => self.multimodal.as_ref(),
            BackendId::General => self.general.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Upper bound for one initialization attempt.
    #[serde(default = "default_init_timeout")]
    pub init_timeout_secs: u64,
    /// Consecutive generation failures that demote a ready adapter.
    #[serde(default = "default_demote_after")]
    pub demote_after_failures: u32,
    /// Upper bound for one whole generation, whatever the engine.
    #[serde(default = "default_generate_timeout")]
    pub generate_timeout_secs: u64,
    /// Cooldown before a degraded adapter is initialized again on next use.
    /// Unset means degraded adapters stay degraded.
    #[serde(default)]
    pub reinit_cooldown_secs: Option<u64>,
    /// Initialize every backend at startup instead of on first use.
    #[serde(default)]
    pub warm_up: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            init_timeout_secs: default_init_timeout(),
            demote_after_failures: default_demote_after(),
            generate_timeout_secs: default_generate_timeout(),
            reinit_cooldown_secs: None,
            warm_up: false,
        }
    }
}

impl RegistryConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn generate_timeout(&self) -> Duration {
        Duration::from_secs(self.generate_timeout_secs)
    }

    pub fn reinit_cooldown(&self) -> Option<Duration> {
        self.reinit_cooldown_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamingConfig {
    /// Longest wait for the next fragment before the backend counts as failed.
    #[serde(default = "default_fragment_timeout")]
    pub fragment_timeout_secs: u64,
    /// Fragments buffered between the producer and the consumer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            fragment_timeout_secs: default_fragment_timeout(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl StreamingConfig {
    pub fn fragment_timeout(&self) -> Duration {
        Duration::from_secs(self.fragment_timeout_secs)
    }
}

/// Generation defaults applied when a request does not set them.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

// Default values
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_request_timeout() -> u64 {
    300
}
fn default_server_binary() -> String {
    "llama-server".to_string()
}
fn default_context_size() -> u32 {
    2048
}
fn default_startup_timeout() -> u64 {
    120
}
fn default_shutdown_timeout() -> u64 {
    10
}
pub(crate) fn default_init_timeout() -> u64 {
    180
}
pub(crate) fn default_demote_after() -> u32 {
    3
}
pub(crate) fn default_generate_timeout() -> u64 {
    300
}
pub(crate) fn default_fragment_timeout() -> u64 {
    120
}
pub(crate) fn default_channel_capacity() -> usize {
    64
}
pub(crate) fn default_max_tokens() -> u32 {
    256
}
pub(crate) fn default_temperature() -> f32 {
    0.8
}
