//! Builders for tests that need a gateway without real models.

use std::sync::Arc;
use std::time::Duration;

use relay_common::BackendId;
use relay_engine::test_util::ScriptedEngine;
use relay_engine::{AdapterPolicy, BackendRegistry, GenerationEngine};

use crate::config::{Config, LoggingConfig, ServerConfig};
use crate::service::RelayService;
use crate::AppState;

/// Configuration with defaults everywhere except local-only quota counting.
pub fn test_config() -> Config {
    let mut config = Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
        ..Config::default()
    };
    config.quota.redis_url = None;
    config
}

/// Registry whose coder and general backends run the given scripts. Backends
/// without a script have no engine and run degraded.
pub fn scripted_registry(
    coder: Option<Arc<ScriptedEngine>>,
    general: Option<Arc<ScriptedEngine>>,
) -> BackendRegistry {
    let policy = AdapterPolicy {
        init_timeout: Duration::from_secs(5),
        demote_after_failures: 3,
        generate_timeout: Duration::from_secs(30),
        reinit_cooldown: None,
    };
    BackendRegistry::with_engines(policy, |id| {
        let engine = match id {
            BackendId::Coder => coder.clone(),
            BackendId::General => general.clone(),
            _ => None,
        };
        engine.map(|e| e as Arc<dyn GenerationEngine>)
    })
}

/// App state around a scripted registry.
pub fn create_test_state(
    config: Config,
    coder: Option<Arc<ScriptedEngine>>,
    general: Option<Arc<ScriptedEngine>>,
) -> AppState {
    let registry = Arc::new(scripted_registry(coder, general));
    AppState {
        service: RelayService::with_registry(&config, registry),
    }
}
