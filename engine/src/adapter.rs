//! Per-backend adapter: lazy initialization, Ready/Degraded state and
//! fallback for whole (non-streaming) generations.

use std::sync::Arc;
use std::time::Duration;

use relay_common::{AdapterState, BackendId};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::config::RegistryConfig;
use crate::engine::{FragmentStream, GenerationEngine, GenerationOptions};
use crate::error::{Error, Result};
use crate::fallback::FallbackResponder;

/// Lifecycle policy shared by every adapter of a registry.
#[derive(Debug, Clone)]
pub struct AdapterPolicy {
    pub init_timeout: Duration,
    /// Consecutive failures that demote a Ready adapter. Zero disables demotion.
    pub demote_after_failures: u32,
    pub generate_timeout: Duration,
    pub reinit_cooldown: Option<Duration>,
}

impl Default for AdapterPolicy {
    fn default() -> Self {
        Self::from(&RegistryConfig::default())
    }
}

impl From<&RegistryConfig> for AdapterPolicy {
    fn from(config: &RegistryConfig) -> Self {
        Self {
            init_timeout: config.init_timeout(),
            demote_after_failures: config.demote_after_failures,
            generate_timeout: config.generate_timeout(),
            reinit_cooldown: config.reinit_cooldown(),
        }
    }
}

/// Result of a whole generation. Always carries text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    /// Whether `text` came from the fallback responder.
    pub fallback: bool,
}

#[derive(Debug)]
struct Slot {
    state: AdapterState,
    changed_at: Instant,
    consecutive_failures: u32,
    last_error: Option<String>,
}

/// Uniform generation surface over one backend's engine.
///
/// State is mutated only by initialization and by the failure bookkeeping of
/// generation calls. Neither ever surfaces an error to the caller.
pub struct Adapter {
    id: BackendId,
    engine: Option<Arc<dyn GenerationEngine>>,
    fallback: FallbackResponder,
    policy: AdapterPolicy,
    slot: RwLock<Slot>,
    init_lock: Mutex<()>,
}

impl Adapter {
    /// Create an adapter. `None` means the backend has no resource configured
    /// and the adapter will go Degraded on first use.
    pub fn new(
        id: BackendId,
        engine: Option<Arc<dyn GenerationEngine>>,
        policy: AdapterPolicy,
    ) -> Self {
        Self {
            id,
            engine,
            fallback: FallbackResponder::new(id),
            policy,
            slot: RwLock::new(Slot {
                state: AdapterState::Uninitialized,
                changed_at: Instant::now(),
                consecutive_failures: 0,
                last_error: None,
            }),
            init_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> BackendId {
        self.id
    }

    pub fn fallback(&self) -> &FallbackResponder {
        &self.fallback
    }

    pub async fn state(&self) -> AdapterState {
        self.slot.read().await.state
    }

    /// Reason for the last transition to Degraded, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.slot.read().await.last_error.clone()
    }

    fn needs_init(&self, slot: &Slot) -> bool {
        match slot.state {
            AdapterState::Uninitialized => true,
            AdapterState::Ready => false,
            AdapterState::Degraded => match (self.policy.reinit_cooldown, &self.engine) {
                (Some(cooldown), Some(_)) => slot.changed_at.elapsed() >= cooldown,
                _ => false,
            },
        }
    }

    /// Initialize the backend if it has not been, and report its state.
    ///
    /// Concurrent callers share a single attempt: the first one runs `load`,
    /// the others wait on the init lock and observe its outcome.
    pub async fn ensure_ready(&self) -> AdapterState {
        {
            let slot = self.slot.read().await;
            if !self.needs_init(&slot) {
                return slot.state;
            }
        }

        let _guard = self.init_lock.lock().await;

        // Another caller may have finished the attempt while we waited
        let retrying = {
            let slot = self.slot.read().await;
            if !self.needs_init(&slot) {
                return slot.state;
            }
            slot.state == AdapterState::Degraded
        };

        if retrying {
            tracing::info!(backend = %self.id, "Retrying initialization of degraded backend");
        }

        let outcome = match &self.engine {
            None => Err(Error::EngineNotConfigured(self.id.to_string())),
            Some(engine) => {
                tracing::debug!(
                    backend = %self.id,
                    engine = engine.engine_type(),
                    "Initializing backend"
                );
                match tokio::time::timeout(self.policy.init_timeout, engine.load()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(self.policy.init_timeout)),
                }
            }
        };

        let mut slot = self.slot.write().await;
        slot.changed_at = Instant::now();
        slot.consecutive_failures = 0;
        match outcome {
            Ok(()) => {
                slot.state = AdapterState::Ready;
                slot.last_error = None;
                tracing::info!(backend = %self.id, "Backend ready");
            }
            Err(e) => {
                slot.state = AdapterState::Degraded;
                slot.last_error = Some(e.to_string());
                tracing::warn!(
                    backend = %self.id,
                    error = %e,
                    "Backend initialization failed, serving fallback responses"
                );
            }
        }
        slot.state
    }

    /// Generate a whole response. Never fails: a Degraded backend, an engine
    /// error or empty output all yield the fallback text.
    pub async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Generation {
        let engine = match (self.ensure_ready().await, &self.engine) {
            (AdapterState::Ready, Some(engine)) => engine,
            _ => return self.fallback_generation(prompt),
        };

        let timeout = self.policy.generate_timeout;
        let result = match tokio::time::timeout(timeout, engine.generate(prompt, options)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(timeout)),
        };

        match result {
            Ok(text) if !text.trim().is_empty() => {
                self.record_success().await;
                Generation {
                    text,
                    fallback: false,
                }
            }
            Ok(_) => {
                tracing::debug!(backend = %self.id, "Backend produced no text, using fallback");
                self.fallback_generation(prompt)
            }
            Err(e) => {
                self.record_failure(&e).await;
                self.fallback_generation(prompt)
            }
        }
    }

    fn fallback_generation(&self, prompt: &str) -> Generation {
        Generation {
            text: self.fallback.respond(prompt),
            fallback: true,
        }
    }

    /// Open the engine's fragment stream, or report why there is none.
    ///
    /// `timeout` bounds the engine's setup of the stream, not initialization.
    pub(crate) async fn open_upstream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        timeout: Duration,
    ) -> Result<FragmentStream> {
        let engine = match (self.ensure_ready().await, &self.engine) {
            (AdapterState::Ready, Some(engine)) => engine,
            _ => return Err(Error::Degraded(self.id.to_string())),
        };

        match tokio::time::timeout(timeout, engine.stream(prompt, options)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    /// Note a generation that produced output.
    pub(crate) async fn record_success(&self) {
        let mut slot = self.slot.write().await;
        slot.consecutive_failures = 0;
    }

    /// Note a failed generation, demoting the adapter when failures repeat.
    pub(crate) async fn record_failure(&self, error: &Error) {
        if error.is_degraded() {
            return;
        }

        let mut slot = self.slot.write().await;
        if slot.state != AdapterState::Ready {
            return;
        }

        slot.consecutive_failures += 1;
        let threshold = self.policy.demote_after_failures;
        if threshold > 0 && slot.consecutive_failures >= threshold {
            slot.state = AdapterState::Degraded;
            slot.changed_at = Instant::now();
            slot.last_error = Some(error.to_string());
            tracing::warn!(
                backend = %self.id,
                failures = slot.consecutive_failures,
                error = %error,
                "Backend demoted to degraded after repeated generation failures"
            );
        } else {
            tracing::debug!(
                backend = %self.id,
                failures = slot.consecutive_failures,
                error = %error,
                "Generation failed, using fallback for this call"
            );
        }
    }

    /// Release the engine's resource.
    pub async fn shutdown(&self) {
        if let Some(engine) = &self.engine {
            if self.state().await == AdapterState::Ready {
                engine.shutdown().await;
            }
        }
    }
}
