//! Scripted engine for exercising adapters, the registry and streaming
//! without a real model.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use relay_common::Fragment;

use crate::engine::{FragmentStream, GenerationEngine, GenerationOptions};
use crate::error::{Error, Result};

/// One step of a scripted generation.
#[derive(Debug, Clone)]
pub enum Step {
    /// Produce a fragment with this text.
    Text(String),
    /// Produce an empty fragment.
    Empty,
    /// Fail the generation with this message.
    Fail(String),
    /// Wait before the next step.
    Pause(Duration),
}

/// Engine that replays the same script on every call.
pub struct ScriptedEngine {
    steps: Vec<Step>,
    load_fails: AtomicBool,
    load_delay: Duration,
    setup_delay: Duration,
    load_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    open_streams: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            load_fails: AtomicBool::new(false),
            load_delay: Duration::ZERO,
            setup_delay: Duration::ZERO,
            load_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shorthand for a script of text fragments.
    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Step::Text(t.to_string())).collect())
    }

    pub fn with_load_failure(self) -> Self {
        self.set_load_failure(true);
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Delay before `generate` starts or `stream` hands back its stream,
    /// like a server that accepts the request but never answers.
    pub fn with_setup_delay(mut self, delay: Duration) -> Self {
        self.setup_delay = delay;
        self
    }

    pub fn set_load_failure(&self, fails: bool) {
        self.load_fails.store(fails, Ordering::SeqCst);
    }

    /// Number of times `load` was called.
    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    /// Number of times `stream` was called.
    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Streams handed out and not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }
}

/// Decrements the open stream count when the stream is dropped.
struct OpenStreamGuard(Arc<AtomicUsize>);

impl OpenStreamGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for OpenStreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationEngine for ScriptedEngine {
    fn engine_type(&self) -> &'static str {
        "scripted"
    }

    async fn load(&self) -> Result<()> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        if self.load_fails.load(Ordering::SeqCst) {
            return Err(Error::ModelNotFound("scripted model".to_string()));
        }
        Ok(())
    }

    async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<String> {
        if !self.setup_delay.is_zero() {
            tokio::time::sleep(self.setup_delay).await;
        }
        let mut text = String::new();
        for step in &self.steps {
            match step {
                Step::Text(t) => text.push_str(t),
                Step::Empty => {}
                Step::Fail(msg) => return Err(Error::InferenceFailed(msg.clone())),
                Step::Pause(d) => tokio::time::sleep(*d).await,
            }
        }
        Ok(text)
    }

    async fn stream(&self, _prompt: &str, _options: &GenerationOptions) -> Result<FragmentStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if !self.setup_delay.is_zero() {
            tokio::time::sleep(self.setup_delay).await;
        }
        let guard = OpenStreamGuard::new(self.open_streams.clone());
        let steps = self.steps.clone().into_iter();

        let fragments = stream::unfold(
            (steps, guard, false),
            |(mut steps, guard, failed)| async move {
                if failed {
                    return None;
                }
                loop {
                    match steps.next()? {
                        Step::Text(t) => return Some((Ok(Fragment::new(t)), (steps, guard, false))),
                        Step::Empty => return Some((Ok(Fragment::empty()), (steps, guard, false))),
                        Step::Fail(msg) => {
                            return Some((Err(Error::InferenceFailed(msg)), (steps, guard, true)))
                        }
                        Step::Pause(d) => tokio::time::sleep(d).await,
                    }
                }
            },
        );

        Ok(Box::pin(fragments))
    }
}
