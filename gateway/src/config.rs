//! Configuration for the relay gateway.

use std::time::Duration;

use config::{Config as ConfigLoader, Environment, File, FileFormat};
use relay_common::{BackendId, Category, Tier};
use relay_engine::{BackendsConfig, GenerationConfig, RegistryConfig, StreamingConfig};
use serde::Deserialize;

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Engine per backend. Backends left out run degraded.
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Per-tier request ceilings and the counter backing them.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_free_limit")]
    pub free: u32,
    #[serde(default = "default_premium_limit")]
    pub premium: u32,
    #[serde(default = "default_admin_limit")]
    pub admin: u32,
    /// Length of a quota window.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Shared counter for multi-process deployments. Unset means
    /// process-local counting only.
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Longest wait for the shared counter before counting locally.
    #[serde(default = "default_redis_timeout_ms")]
    pub redis_timeout_ms: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free: default_free_limit(),
            premium: default_premium_limit(),
            admin: default_admin_limit(),
            window_secs: default_window_secs(),
            redis_url: None,
            redis_timeout_ms: default_redis_timeout_ms(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl QuotaConfig {
    /// Requests allowed per window for a tier.
    pub fn ceiling(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Free => self.free,
            Tier::Premium => self.premium,
            Tier::Admin => self.admin,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms)
    }
}

/// Category to backend table.
///
/// Without a `[routing]` section every category goes to its natural
/// backend. Within a section, categories left out go to `general`.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub code: Option<BackendId>,
    #[serde(default)]
    pub document: Option<BackendId>,
    #[serde(default)]
    pub media: Option<BackendId>,
    #[serde(default = "default_general_backend")]
    pub general: BackendId,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            code: Some(BackendId::Coder),
            document: Some(BackendId::Documents),
            media: Some(BackendId::Multimodal),
            general: default_general_backend(),
        }
    }
}

impl RoutingConfig {
    /// Configured backend for a category, if any.
    pub fn get(&self, category: Category) -> Option<BackendId> {
        match category {
            Category::Code => self.code,
            Category::Document => self.document,
            Category::Media => self.media,
            Category::General => Some(self.general),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_free_limit() -> u32 {
    10
}
fn default_premium_limit() -> u32 {
    100
}
fn default_admin_limit() -> u32 {
    1000
}
fn default_window_secs() -> u64 {
    3600
}
fn default_redis_timeout_ms() -> u64 {
    250
}
fn default_key_prefix() -> String {
    "relay:quota".to_string()
}
fn default_general_backend() -> BackendId {
    BackendId::General
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (RELAY__SECTION__KEY format)
    /// 2. relay.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let loader = ConfigLoader::builder()
            .add_source(File::with_name("relay").required(false))
            .add_source(
                Environment::with_prefix("RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = loader.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text, without file or environment.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let loader = ConfigLoader::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;

        let config: Config = loader.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.quota.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "quota.window_secs must be greater than zero".to_string(),
            ));
        }
        if self.streaming.fragment_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "streaming.fragment_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_engine::BackendConfig;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.quota.ceiling(Tier::Free), 10);
        assert_eq!(config.quota.ceiling(Tier::Premium), 100);
        assert_eq!(config.quota.ceiling(Tier::Admin), 1000);
        assert_eq!(config.quota.window(), Duration::from_secs(3600));
        assert!(config.quota.redis_url.is_none());
        assert_eq!(config.routing.get(Category::Code), Some(BackendId::Coder));
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.quota.free, 10);
        assert_eq!(config.routing.get(Category::Media), Some(BackendId::Multimodal));
        assert!(config.backends.coder.is_none());
    }

    #[test]
    fn test_partial_routing_table() {
        let config = Config::from_toml(
            r#"
            [routing]
            code = "coder"
            general = "general"
            "#,
        )
        .unwrap();
        assert_eq!(config.routing.get(Category::Code), Some(BackendId::Coder));
        assert_eq!(config.routing.get(Category::Document), None);
        assert_eq!(config.routing.get(Category::General), Some(BackendId::General));
    }

    #[test]
    fn test_full_toml() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 9000

            [quota]
            free = 5
            redis_url = "redis://localhost:6379"
            redis_timeout_ms = 100

            [backends.coder]
            engine = "ollama"
            model = "deepseek-coder:6.7b"

            [backends.general]
            engine = "llama_cpp"
            model_path = "/models/gpt4all.gguf"
            gpu_layers = 0

            [registry]
            reinit_cooldown_secs = 60

            [streaming]
            fragment_timeout_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.quota.free, 5);
        assert_eq!(config.quota.premium, 100);
        assert_eq!(config.quota.redis_timeout(), Duration::from_millis(100));
        assert!(matches!(config.backends.coder, Some(BackendConfig::Ollama(_))));
        assert!(matches!(config.backends.general, Some(BackendConfig::LlamaCpp(_))));
        assert!(config.backends.documents.is_none());
        assert_eq!(config.registry.reinit_cooldown(), Some(Duration::from_secs(60)));
        assert_eq!(config.streaming.fragment_timeout_secs, 30);
    }

    #[test]
    fn test_zero_window_rejected() {
        let err = Config::from_toml("[quota]\nwindow_secs = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
