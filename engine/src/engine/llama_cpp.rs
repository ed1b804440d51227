//! llama.cpp generation engine implementation.
//!
//! This engine runs one llama-server subprocess serving the backend's model
//! file and talks to it over its native `/completion` endpoint.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use relay_common::Fragment;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};

use super::lines::{self, Framing};
use super::{FragmentStream, GenerationEngine, GenerationOptions};
use crate::config::LlamaCppEngineConfig;
use crate::error::{Error, Result};

const HEALTH_CHECK_INTERVAL_MS: u64 = 200;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Leading bytes of every GGUF file.
const GGUF_MAGIC: &[u8; 4] = b"GGUF";

/// A running llama-server instance.
struct ServerInstance {
    port: u16,
    process: Mutex<Option<Child>>,
}

impl ServerInstance {
    fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Check if the server process is still alive.
    async fn is_process_alive(&self) -> bool {
        let mut process = self.process.lock().await;
        match process.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Terminate the server process gracefully.
    async fn terminate(&self, model: &str, timeout_secs: u64) {
        let Some(mut child) = self.process.lock().await.take() else {
            return;
        };

        // Try SIGTERM first on Unix
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!("llama-server for {} exited with {}", model, status);
            }
            Ok(Err(e)) => {
                tracing::warn!("Error waiting for llama-server {}: {}", model, e);
            }
            Err(_timeout) => {
                tracing::warn!("llama-server {} didn't stop gracefully, killing", model);
                let _ = child.kill().await;
            }
        }
    }
}

/// llama.cpp generation engine.
pub struct LlamaCppEngine {
    config: LlamaCppEngineConfig,
    http_client: Client,
    server: RwLock<Option<ServerInstance>>,
}

impl LlamaCppEngine {
    pub fn new(config: LlamaCppEngineConfig) -> Self {
        let http_client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            config,
            http_client,
            server: RwLock::new(None),
        }
    }

    fn model_path(&self) -> PathBuf {
        PathBuf::from(&self.config.model_path)
    }

    fn model_name(&self) -> String {
        model_name(&self.model_path())
    }

    /// Allocate a port for the server.
    async fn allocate_port(&self) -> Result<u16> {
        if let Some(port) = self.config.port {
            return Ok(port);
        }

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::LoadFailed(format!("Failed to bind for port allocation: {}", e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::LoadFailed(format!("Failed to get local addr: {}", e)))?
            .port();
        drop(listener);
        Ok(port)
    }

    fn build_command(&self, model_path: &Path, port: u16) -> Command {
        let mut cmd = Command::new(&self.config.server_binary);

        // Wrapper arguments (e.g., toolbox run -c llamacpp llama-server)
        // must come before the llama-server flags
        cmd.args(&self.config.server_args);
        cmd.arg("-m")
            .arg(model_path)
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string())
            .arg("-c")
            .arg(self.config.context_size.to_string());

        if let Some(gpu_layers) = self.config.gpu_layers {
            cmd.arg("-ngl").arg(gpu_layers.to_string());
        }
        if let Some(threads) = self.config.threads {
            cmd.arg("-t").arg(threads.to_string());
        }
        cmd.args(&self.config.extra_args);

        cmd.stdin(Stdio::null()).kill_on_drop(true);
        if self.config.log_server_output {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        cmd
    }

    /// Wait for a freshly spawned server to answer its health endpoint.
    async fn wait_for_ready(&self, instance: &ServerInstance) -> Result<()> {
        let timeout = Duration::from_secs(self.config.startup_timeout_secs);
        let start = Instant::now();
        let health_url = format!("{}/health", instance.base_url());

        loop {
            if start.elapsed() > timeout {
                return Err(Error::LoadFailed(format!(
                    "llama-server startup timeout for {} after {:?}",
                    self.model_name(),
                    start.elapsed()
                )));
            }

            if !instance.is_process_alive().await {
                return Err(Error::LoadFailed(format!(
                    "llama-server process died during startup for {}",
                    self.model_name()
                )));
            }

            if let Ok(resp) = self.http_client.get(&health_url).send().await {
                if resp.status().is_success() {
                    tracing::info!(
                        "llama-server ready for {} on port {} ({:?})",
                        self.model_name(),
                        instance.port,
                        start.elapsed()
                    );
                    return Ok(());
                }
            }

            tokio::time::sleep(Duration::from_millis(HEALTH_CHECK_INTERVAL_MS)).await;
        }
    }

    async fn base_url(&self) -> Result<String> {
        let server = self.server.read().await;
        server
            .as_ref()
            .map(ServerInstance::base_url)
            .ok_or_else(|| Error::InferenceFailed(format!("llama-server for {} is not running", self.model_name())))
    }

    async fn post_completion(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/completion", self.base_url().await?);
        let request = CompletionRequest {
            prompt,
            n_predict: options.max_tokens,
            temperature: options.temperature,
            stop: &options.stop,
            stream,
        };

        let mut builder = self.http_client.post(&url).json(&request);
        if !stream {
            builder = builder.timeout(Duration::from_secs(self.config.request_timeout_secs));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    tracing::warn!("Connection failed to llama-server for {}", self.model_name());
                }
                Error::Communication(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::InferenceFailed(format!("{}: {}", status, body)));
        }
        Ok(response)
    }
}

/// Model name used in logs: the file stem of the model path.
fn model_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Check that the model file exists and is a GGUF file.
async fn check_model_file(path: &Path) -> Result<()> {
    let has_gguf_extension = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("gguf"));
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::ModelNotFound(format!(
                "Model file not found: {}",
                path.display()
            )));
        }
        Err(e) => {
            return Err(Error::LoadFailed(format!(
                "Cannot open model file {}: {}",
                path.display(),
                e
            )));
        }
    };

    if !has_gguf_extension {
        return Err(Error::IncompatibleFormat(format!(
            "{} does not have a .gguf extension",
            path.display()
        )));
    }

    let mut magic = [0u8; 4];
    let is_gguf = match file.read_exact(&mut magic).await {
        Ok(_) => &magic == GGUF_MAGIC,
        Err(_) => false,
    };
    if !is_gguf {
        return Err(Error::IncompatibleFormat(format!(
            "{} is not a GGUF model file",
            path.display()
        )));
    }
    Ok(())
}

// ============================================================================
// llama-server API types
// ============================================================================

/// Request body for llama-server /completion endpoint.
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    stop: &'a [String],
    stream: bool,
}

/// Response from /completion, or one `data:` event of a streamed one.
#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    content: String,
    #[serde(default)]
    stop: bool,
}

// ============================================================================
// GenerationEngine implementation
// ============================================================================

#[async_trait]
impl GenerationEngine for LlamaCppEngine {
    fn engine_type(&self) -> &'static str {
        "llama_cpp"
    }

    async fn load(&self) -> Result<()> {
        let model_path = self.model_path();
        check_model_file(&model_path).await?;

        // Replace a server left over from an earlier attempt
        if let Some(old) = self.server.write().await.take() {
            old.terminate(&self.model_name(), self.config.shutdown_timeout_secs)
                .await;
        }

        let port = self.allocate_port().await?;
        let process = self.build_command(&model_path, port).spawn().map_err(|e| {
            Error::LoadFailed(format!(
                "Failed to spawn llama-server for {}: {}. Binary: {}",
                self.model_name(),
                e,
                self.config.server_binary
            ))
        })?;

        tracing::info!(
            "Spawned llama-server for {} on port {} (pid: {:?})",
            self.model_name(),
            port,
            process.id()
        );

        let instance = ServerInstance {
            port,
            process: Mutex::new(Some(process)),
        };

        if let Err(e) = self.wait_for_ready(&instance).await {
            instance
                .terminate(&self.model_name(), self.config.shutdown_timeout_secs)
                .await;
            return Err(e);
        }

        *self.server.write().await = Some(instance);
        Ok(())
    }

    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let response = self.post_completion(prompt, options, false).await?;
        let chunk: CompletionChunk = response
            .json()
            .await
            .map_err(|e| Error::InferenceFailed(e.to_string()))?;
        Ok(chunk.content)
    }

    async fn stream(&self, prompt: &str, options: &GenerationOptions) -> Result<FragmentStream> {
        let response = self.post_completion(prompt, options, true).await?;

        let fragments = lines::decode::<CompletionChunk>(response, Framing::Sse).filter_map(
            |event| async move {
                match event {
                    // The final event repeats generation settings, not text
                    Ok(chunk) if chunk.stop && chunk.content.is_empty() => None,
                    Ok(chunk) => Some(Ok(Fragment::new(chunk.content))),
                    Err(e) => Some(Err(e)),
                }
            },
        );

        Ok(Box::pin(fragments))
    }

    async fn shutdown(&self) {
        if let Some(instance) = self.server.write().await.take() {
            instance
                .terminate(&self.model_name(), self.config.shutdown_timeout_secs)
                .await;
            tracing::info!("llama-server for {} stopped", self.model_name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_config(model_path: &str) -> LlamaCppEngineConfig {
        LlamaCppEngineConfig {
            model_path: model_path.to_string(),
            server_binary: "/nonexistent/llama-server".to_string(),
            server_args: vec![],
            gpu_layers: Some(35),
            context_size: 4096,
            threads: None,
            port: None,
            startup_timeout_secs: 1,
            shutdown_timeout_secs: 1,
            request_timeout_secs: 5,
            log_server_output: false,
            extra_args: vec![],
        }
    }

    #[test]
    fn test_engine_type() {
        let engine = LlamaCppEngine::new(test_config("/tmp/model.gguf"));
        assert_eq!(engine.engine_type(), "llama_cpp");
    }

    #[test]
    fn test_model_name() {
        assert_eq!(model_name(Path::new("/models/llama-7b-q4_0.gguf")), "llama-7b-q4_0");
    }

    #[tokio::test]
    async fn test_port_allocation_fixed() {
        let mut config = test_config("/tmp/model.gguf");
        config.port = Some(9000);
        let engine = LlamaCppEngine::new(config);
        assert_eq!(engine.allocate_port().await.unwrap(), 9000);
    }

    #[tokio::test]
    async fn test_port_allocation_dynamic() {
        let engine = LlamaCppEngine::new(test_config("/tmp/model.gguf"));
        let port = engine.allocate_port().await.unwrap();
        assert!(port > 0);
    }

    #[tokio::test]
    async fn test_load_missing_model_file() {
        let engine = LlamaCppEngine::new(test_config("/nonexistent/model.gguf"));
        let err = engine.load().await.unwrap_err();
        match err {
            Error::ModelNotFound(msg) => assert!(msg.contains("/nonexistent/model.gguf")),
            other => panic!("Expected ModelNotFound error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_load_wrong_extension() {
        let mut file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        file.write_all(b"GGUF\x03\x00\x00\x00").unwrap();

        let engine = LlamaCppEngine::new(test_config(file.path().to_str().unwrap()));
        let err = engine.load().await.unwrap_err();
        assert!(matches!(err, Error::IncompatibleFormat(_)));
    }

    #[tokio::test]
    async fn test_load_incompatible_model_file() {
        let mut file = tempfile::Builder::new().suffix(".gguf").tempfile().unwrap();
        file.write_all(b"PK\x03\x04 definitely not gguf").unwrap();

        let engine = LlamaCppEngine::new(test_config(file.path().to_str().unwrap()));
        let err = engine.load().await.unwrap_err();
        assert!(matches!(err, Error::IncompatibleFormat(_)));
    }

    #[tokio::test]
    async fn test_load_spawn_failure() {
        let mut file = tempfile::Builder::new().suffix(".gguf").tempfile().unwrap();
        file.write_all(b"GGUF\x03\x00\x00\x00").unwrap();

        let engine = LlamaCppEngine::new(test_config(file.path().to_str().unwrap()));
        let err = engine.load().await.unwrap_err();
        assert!(matches!(err, Error::LoadFailed(_)));
    }

    #[tokio::test]
    async fn test_generate_without_server_fails() {
        let engine = LlamaCppEngine::new(test_config("/tmp/model.gguf"));
        let result = engine.generate("hi", &GenerationOptions::default()).await;
        assert!(matches!(result, Err(Error::InferenceFailed(_))));
    }

    #[tokio::test]
    async fn test_stream_decodes_sse_events() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"content\":\"Hel\",\"stop\":false}\n\n",
            "data: {\"content\":\"lo\",\"stop\":false}\n\n",
            "data: {\"content\":\"\",\"stop\":true,\"tokens_predicted\":2}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/completion"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let engine = LlamaCppEngine::new(test_config("/tmp/model.gguf"));
        *engine.server.write().await = Some(ServerInstance {
            port: server.address().port(),
            process: Mutex::new(None),
        });

        let stream = engine
            .stream("Hi", &GenerationOptions::default())
            .await
            .unwrap();
        let fragments: Vec<_> = stream.map(|f| f.unwrap().text).collect().await;
        assert_eq!(fragments, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_shutdown_without_server_is_noop() {
        let engine = LlamaCppEngine::new(test_config("/tmp/model.gguf"));
        engine.shutdown().await;
    }
}
