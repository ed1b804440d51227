//! Registry owning one adapter per backend.

use std::sync::Arc;

use futures_util::future::join_all;
use relay_common::{AdapterState, BackendId};

use crate::adapter::{Adapter, AdapterPolicy};
use crate::config::{BackendsConfig, RegistryConfig};
use crate::engine::{self, GenerationEngine};

/// Every backend always has an adapter; one without a configured engine
/// simply runs degraded.
pub struct BackendRegistry {
    adapters: Vec<Arc<Adapter>>,
}

impl BackendRegistry {
    /// Build adapters for every backend from configuration.
    pub fn from_config(backends: &BackendsConfig, registry: &RegistryConfig) -> Self {
        let policy = AdapterPolicy::from(registry);
        Self::with_engines(policy, |id| {
            let config = backends.get(id);
            if config.is_none() {
                tracing::warn!(backend = %id, "No engine configured, backend will serve fallback responses");
            }
            config.map(engine::from_config)
        })
    }

    /// Build adapters with engines supplied by `engine_for`.
    pub fn with_engines<F>(policy: AdapterPolicy, mut engine_for: F) -> Self
    where
        F: FnMut(BackendId) -> Option<Arc<dyn GenerationEngine>>,
    {
        let adapters = BackendId::ALL
            .iter()
            .map(|&id| Arc::new(Adapter::new(id, engine_for(id), policy.clone())))
            .collect();
        Self { adapters }
    }

    /// Adapter for a backend, without initializing it.
    pub fn get(&self, id: BackendId) -> Arc<Adapter> {
        self.adapters[id.index()].clone()
    }

    /// Adapter for a backend after its lazy initialization has run.
    ///
    /// The adapter is returned whether it ended up Ready or Degraded.
    pub async fn resolve(&self, id: BackendId) -> Arc<Adapter> {
        let adapter = self.get(id);
        adapter.ensure_ready().await;
        adapter
    }

    /// Current state of every backend, in [`BackendId::ALL`] order.
    pub async fn states(&self) -> Vec<(BackendId, AdapterState)> {
        let mut states = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            states.push((adapter.id(), adapter.state().await));
        }
        states
    }

    /// Initialize every backend now instead of on first use.
    pub async fn warm_up(&self) {
        let states = join_all(self.adapters.iter().map(|a| a.ensure_ready())).await;
        let ready = states.iter().filter(|s| s.is_ready()).count();
        tracing::info!("Backend warm-up finished: {}/{} ready", ready, states.len());
    }

    /// Release every engine resource.
    pub async fn shutdown(&self) {
        join_all(self.adapters.iter().map(|a| a.shutdown())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{ScriptedEngine, Step};
    use std::time::Duration;

    fn policy() -> AdapterPolicy {
        AdapterPolicy {
            init_timeout: Duration::from_secs(5),
            demote_after_failures: 3,
            generate_timeout: Duration::from_secs(30),
            reinit_cooldown: None,
        }
    }

    #[tokio::test]
    async fn test_every_backend_present() {
        let registry = BackendRegistry::with_engines(policy(), |_| None);
        for id in BackendId::ALL {
            assert_eq!(registry.get(id).id(), id);
        }
        let states = registry.states().await;
        assert_eq!(states.len(), BackendId::ALL.len());
        assert!(states.iter().all(|(_, s)| *s == AdapterState::Uninitialized));
    }

    #[tokio::test]
    async fn test_resolve_initializes_lazily() {
        let engine = Arc::new(ScriptedEngine::texts(&["ok"]));
        let shared = engine.clone();
        let registry = BackendRegistry::with_engines(policy(), move |id| {
            (id == BackendId::Coder).then(|| shared.clone() as Arc<dyn GenerationEngine>)
        });

        assert_eq!(engine.load_calls(), 0);
        let adapter = registry.resolve(BackendId::Coder).await;
        assert_eq!(adapter.state().await, AdapterState::Ready);
        assert_eq!(engine.load_calls(), 1);

        let general = registry.resolve(BackendId::General).await;
        assert_eq!(general.state().await, AdapterState::Degraded);
        assert_eq!(
            registry.get(BackendId::Documents).state().await,
            AdapterState::Uninitialized
        );
    }

    #[tokio::test]
    async fn test_concurrent_first_use_loads_once() {
        let engine = Arc::new(
            ScriptedEngine::new(vec![Step::Text("ok".into())])
                .with_load_delay(Duration::from_millis(50)),
        );
        let shared = engine.clone();
        let registry = Arc::new(BackendRegistry::with_engines(policy(), move |_| {
            Some(shared.clone() as Arc<dyn GenerationEngine>)
        }));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.resolve(BackendId::General).await.state().await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), AdapterState::Ready);
        }
        assert_eq!(engine.load_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_use_failure_observed_by_all() {
        let engine = Arc::new(
            ScriptedEngine::new(vec![])
                .with_load_failure()
                .with_load_delay(Duration::from_millis(50)),
        );
        let shared = engine.clone();
        let registry = Arc::new(BackendRegistry::with_engines(policy(), move |_| {
            Some(shared.clone() as Arc<dyn GenerationEngine>)
        }));

        let resolves = (0..10).map(|_| {
            let registry = registry.clone();
            async move { registry.resolve(BackendId::Coder).await.state().await }
        });
        let states = join_all(resolves).await;
        assert!(states.iter().all(|s| *s == AdapterState::Degraded));
        assert_eq!(engine.load_calls(), 1);
    }

    #[tokio::test]
    async fn test_warm_up_initializes_all() {
        let registry = BackendRegistry::with_engines(policy(), |id| {
            (id != BackendId::Multimodal)
                .then(|| Arc::new(ScriptedEngine::texts(&["ok"])) as Arc<dyn GenerationEngine>)
        });
        registry.warm_up().await;

        for (id, state) in registry.states().await {
            if id == BackendId::Multimodal {
                assert_eq!(state, AdapterState::Degraded);
            } else {
                assert_eq!(state, AdapterState::Ready);
            }
        }
    }

    #[tokio::test]
    async fn test_from_config_without_backends_degrades() {
        let registry =
            BackendRegistry::from_config(&BackendsConfig::default(), &RegistryConfig::default());
        let adapter = registry.resolve(BackendId::Coder).await;
        assert_eq!(adapter.state().await, AdapterState::Degraded);
    }
}
