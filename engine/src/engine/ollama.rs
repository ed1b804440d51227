//! Ollama generation engine implementation.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use relay_common::Fragment;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::lines::{self, Framing};
use super::{FragmentStream, GenerationEngine, GenerationOptions};
use crate::config::OllamaEngineConfig;
use crate::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Ollama generation engine.
///
/// Serves one model from an Ollama server. Loading checks that the server
/// knows the model and warms it so the first real request is not slowed by
/// the model load.
pub struct OllamaEngine {
    http_client: Client,
    base_url: String,
    model: String,
    request_timeout: Duration,
}

impl OllamaEngine {
    pub fn new(config: OllamaEngineConfig) -> Self {
        let http_client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    fn generate_request<'a>(
        &'a self,
        prompt: &'a str,
        options: &'a GenerationOptions,
        stream: bool,
    ) -> OllamaGenerateRequest<'a> {
        OllamaGenerateRequest {
            model: &self.model,
            prompt,
            stream,
            keep_alive: None,
            options: Some(OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
                stop: &options.stop,
            }),
        }
    }

    async fn post_generate(&self, request: &OllamaGenerateRequest<'_>) -> Result<reqwest::Response> {
        let url = format!("{}/api/generate", self.base_url);
        let mut builder = self.http_client.post(&url).json(request);
        if !request.stream {
            builder = builder.timeout(self.request_timeout);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::InferenceFailed(format!("{}: {}", status, body)));
        }
        Ok(response)
    }
}

// ============================================================================
// Ollama API types
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions<'a>>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions<'a> {
    temperature: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "no_stop")]
    stop: &'a [String],
}

fn no_stop(stop: &&[String]) -> bool {
    stop.is_empty()
}

/// One /api/generate response, or one line of a streamed one.
#[derive(Debug, Deserialize)]
struct OllamaGenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Response from /api/tags endpoint.
#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModelInfo>,
}

#[derive(Debug, Deserialize)]
struct OllamaModelInfo {
    name: String,
}

/// Whether a tag reported by Ollama names the configured model.
///
/// Ollama reports untagged models as `name:latest`.
fn model_matches(tag: &str, model: &str) -> bool {
    tag == model || (!model.contains(':') && tag.strip_suffix(":latest") == Some(model))
}

// ============================================================================
// GenerationEngine implementation
// ============================================================================

#[async_trait]
impl GenerationEngine for OllamaEngine {
    fn engine_type(&self) -> &'static str {
        "ollama"
    }

    async fn load(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::LoadFailed(format!(
                "Ollama returned {}",
                response.status()
            )));
        }

        let tags: OllamaTagsResponse = response
            .json()
            .await
            .map_err(|e| Error::LoadFailed(e.to_string()))?;

        if !tags.models.iter().any(|m| model_matches(&m.name, &self.model)) {
            return Err(Error::ModelNotFound(self.model.clone()));
        }

        // An empty prompt makes Ollama load the model and keep it resident.
        let warm = OllamaGenerateRequest {
            model: &self.model,
            prompt: "",
            stream: false,
            keep_alive: Some("10m"),
            options: None,
        };
        self.post_generate(&warm)
            .await
            .map_err(|e| Error::LoadFailed(format!("Failed to warm model {}: {}", self.model, e)))?;

        tracing::info!("Ollama model {} loaded/warmed", self.model);
        Ok(())
    }

    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        tracing::debug!("Sending generate request to Ollama: model={}", self.model);

        let request = self.generate_request(prompt, options, false);
        let response = self.post_generate(&request).await?;

        let chunk: OllamaGenerateChunk = response
            .json()
            .await
            .map_err(|e| Error::InferenceFailed(e.to_string()))?;
        if let Some(error) = chunk.error {
            return Err(Error::InferenceFailed(error));
        }
        Ok(chunk.response)
    }

    async fn stream(&self, prompt: &str, options: &GenerationOptions) -> Result<FragmentStream> {
        tracing::debug!("Opening generate stream to Ollama: model={}", self.model);

        let request = self.generate_request(prompt, options, true);
        let response = self.post_generate(&request).await?;

        let fragments = lines::decode::<OllamaGenerateChunk>(response, Framing::Ndjson)
            .filter_map(|line| async move {
                match line {
                    Ok(chunk) => {
                        if let Some(error) = chunk.error {
                            return Some(Err(Error::InferenceFailed(error)));
                        }
                        // The closing line carries statistics, not text
                        if chunk.done && chunk.response.is_empty() {
                            return None;
                        }
                        Some(Ok(Fragment::new(chunk.response)))
                    }
                    Err(e) => Some(Err(e)),
                }
            });

        Ok(Box::pin(fragments))
    }

    async fn shutdown(&self) {
        // keep_alive of zero asks Ollama to unload the model
        let url = format!("{}/api/generate", self.base_url);
        let request = OllamaGenerateRequest {
            model: &self.model,
            prompt: "",
            stream: false,
            keep_alive: Some("0"),
            options: None,
        };

        match self
            .http_client
            .post(&url)
            .json(&request)
            .timeout(CONNECT_TIMEOUT)
            .send()
            .await
        {
            Ok(_) => tracing::info!("Ollama model {} unloaded", self.model),
            Err(e) => tracing::debug!("Ollama unload of {} failed: {}", self.model, e),
        }
    }
}
