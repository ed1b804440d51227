//! Request pipeline: admit, route, resolve, generate, record.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures_util::Stream;
use relay_common::{
    BackendId, ChatRequest, ChatResponse, ChatTurn, CompletionRecord, StreamEvent, Tier,
};
use relay_engine::{
    BackendRegistry, GenerationConfig, GenerationOptions, ResponseStream, StreamingEngine,
};

use crate::admission::{Admission, AdmissionController};
use crate::config::Config;
use crate::error::{Result, ServiceError};
use crate::prompt::build_prompt;
use crate::records::CompletionRecords;
use crate::router::{self, Route, RouteTable};

/// A validated request, ready for admission.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    text: String,
    requested_backend: Option<BackendId>,
    account_id: String,
    tier: Tier,
    history: Vec<ChatTurn>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl InferenceRequest {
    /// Validate the parts every request needs.
    pub fn new(text: impl Into<String>, account_id: impl Into<String>, tier: Tier) -> Result<Self> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(ServiceError::InvalidRequest("message must not be empty".to_string()));
        }
        let account_id = account_id.into().trim().to_string();
        if account_id.is_empty() {
            return Err(ServiceError::InvalidRequest("account id must not be empty".to_string()));
        }

        Ok(Self {
            text,
            requested_backend: None,
            account_id,
            tier,
            history: Vec::new(),
            max_tokens: None,
            temperature: None,
        })
    }

    /// Build from a chat request body and the caller's account.
    pub fn from_chat(request: ChatRequest, account_id: impl Into<String>, tier: Tier) -> Result<Self> {
        let backend = router::parse_override(request.backend.as_deref());
        Ok(Self::new(request.message, account_id, tier)?
            .with_backend(backend)
            .with_history(request.history)
            .with_generation(request.max_tokens, request.temperature))
    }

    pub fn with_backend(mut self, backend: Option<BackendId>) -> Self {
        self.requested_backend = backend;
        self
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_generation(mut self, max_tokens: Option<u32>, temperature: Option<f32>) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }
}

/// Whole response for a non-streaming request.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub response_text: String,
    pub backend_used: BackendId,
    pub fallback: bool,
}

impl From<Completion> for ChatResponse {
    fn from(completion: Completion) -> Self {
        ChatResponse {
            response: completion.response_text,
            backend_used: completion.backend_used,
            fallback: completion.fallback,
        }
    }
}

pub struct RelayService {
    routes: RouteTable,
    registry: Arc<BackendRegistry>,
    streaming: StreamingEngine,
    admission: AdmissionController,
    records: CompletionRecords,
    generation: GenerationConfig,
}

impl RelayService {
    /// Build every component from configuration.
    pub fn from_config(config: &Config) -> Self {
        let registry = BackendRegistry::from_config(&config.backends, &config.registry);
        Self::with_registry(config, Arc::new(registry))
    }

    /// Build around an existing registry.
    pub fn with_registry(config: &Config, registry: Arc<BackendRegistry>) -> Self {
        Self {
            routes: RouteTable::from_config(&config.routing),
            registry,
            streaming: StreamingEngine::new(&config.streaming),
            admission: AdmissionController::from_config(&config.quota),
            records: CompletionRecords::new(),
            generation: config.generation.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn records(&self) -> &CompletionRecords {
        &self.records
    }

    /// Generate a whole response.
    pub async fn complete(&self, request: InferenceRequest) -> Result<Completion> {
        let route = self.admit_and_route(&request).await?;
        let (prompt, options) = self.prepare(&request);

        let adapter = self.registry.resolve(route.backend).await;
        let generation = adapter.generate(&prompt, &options).await;

        let completion = Completion {
            response_text: generation.text,
            backend_used: route.backend,
            fallback: generation.fallback,
        };
        self.records.publish(CompletionRecord::new(
            request.account_id,
            completion.backend_used,
            completion.response_text.clone(),
            completion.fallback,
        ));
        Ok(completion)
    }

    /// Start streaming a response.
    pub async fn stream(&self, request: InferenceRequest) -> Result<RelayStream> {
        let route = self.admit_and_route(&request).await?;
        let (prompt, options) = self.prepare(&request);

        let adapter = self.registry.resolve(route.backend).await;
        let inner = self.streaming.open_stream(adapter, prompt, options);

        Ok(RelayStream {
            inner,
            account_id: Some(request.account_id),
            text: String::new(),
            records: self.records.clone(),
        })
    }

    async fn admit_and_route(&self, request: &InferenceRequest) -> Result<Route> {
        if let Admission::Denied { retry_after } =
            self.admission.admit(&request.account_id, request.tier).await
        {
            return Err(ServiceError::RateLimited { retry_after });
        }

        let route = self.routes.route(&request.text, request.requested_backend);
        tracing::debug!(
            account_id = %request.account_id,
            backend = %route.backend,
            category = route.category.map(|c| c.as_str()).unwrap_or("override"),
            overridden = route.overridden,
            "Request routed"
        );
        Ok(route)
    }

    fn prepare(&self, request: &InferenceRequest) -> (String, GenerationOptions) {
        let prompt = build_prompt(&request.text, &request.history);
        let options =
            GenerationOptions::from_defaults(&self.generation, request.max_tokens, request.temperature);
        (prompt, options)
    }
}

/// Response stream that records the exchange once it ends.
///
/// Dropping it early cancels generation and records nothing.
pub struct RelayStream {
    inner: ResponseStream,
    account_id: Option<String>,
    text: String,
    records: CompletionRecords,
}

impl RelayStream {
    pub fn backend(&self) -> BackendId {
        self.inner.backend()
    }
}

impl Stream for RelayStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let event = ready!(Pin::new(&mut this.inner).poll_next(cx));

        match &event {
            Some(StreamEvent::Fragment(fragment)) => this.text.push_str(&fragment.text),
            Some(StreamEvent::End(outcome)) => {
                if let Some(account_id) = this.account_id.take() {
                    this.records.publish(CompletionRecord::new(
                        account_id,
                        outcome.backend,
                        std::mem::take(&mut this.text),
                        outcome.fallback_fired,
                    ));
                }
            }
            None => {}
        }

        Poll::Ready(event)
    }
}
