//! Streaming engine: drives an adapter's fragment stream and guarantees the
//! caller sees at least one real fragment, followed by a terminal outcome.
//!
//! One producer task per stream pulls from the backend and forwards every
//! fragment, empty ones included, over a bounded channel. When the backend
//! produced no real fragment (degraded, failed, timed out or only empty
//! output) the producer appends the adapter's fallback text split into words.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use relay_common::{BackendId, StreamEvent, StreamOutcome};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::adapter::Adapter;
use crate::config::StreamingConfig;
use crate::engine::GenerationOptions;
use crate::error::Error;

/// Opens fallback-aware response streams over adapters.
#[derive(Debug, Clone)]
pub struct StreamingEngine {
    fragment_timeout: Duration,
    channel_capacity: usize,
}

impl StreamingEngine {
    pub fn new(config: &StreamingConfig) -> Self {
        Self {
            fragment_timeout: config.fragment_timeout(),
            channel_capacity: config.channel_capacity.max(1),
        }
    }

    /// Start streaming a response from `adapter`.
    ///
    /// Must be called from within a tokio runtime; the producer runs as a
    /// spawned task until the stream ends or the returned handle is dropped.
    pub fn open_stream(
        &self,
        adapter: Arc<Adapter>,
        prompt: String,
        options: GenerationOptions,
    ) -> ResponseStream {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let backend = adapter.id();
        let producer = Producer {
            adapter,
            prompt,
            options,
            fragment_timeout: self.fragment_timeout,
            tx,
        };
        let task = tokio::spawn(producer.run());

        ResponseStream {
            backend,
            events: ReceiverStream::new(rx),
            task,
        }
    }
}

impl Default for StreamingEngine {
    fn default() -> Self {
        Self::new(&StreamingConfig::default())
    }
}

/// Ordered, cancellable stream of fragments ending with
/// [`StreamEvent::End`].
///
/// Dropping it stops the producer and releases the backend stream.
pub struct ResponseStream {
    backend: BackendId,
    events: ReceiverStream<StreamEvent>,
    task: JoinHandle<()>,
}

impl ResponseStream {
    pub fn backend(&self) -> BackendId {
        self.backend
    }

    /// Drain the stream into the full response text and its outcome.
    pub async fn collect_text(mut self) -> (String, StreamOutcome) {
        let mut text = String::new();
        while let Some(event) = self.next().await {
            match event {
                StreamEvent::Fragment(fragment) => text.push_str(&fragment.text),
                StreamEvent::End(outcome) => return (text, outcome),
            }
        }

        // Only reachable if the producer task died
        let outcome = StreamOutcome {
            backend: self.backend,
            real_fragments: 0,
            emitted_fragments: 0,
            fallback_fired: false,
            generation_failed: true,
        };
        (text, outcome)
    }
}

impl Stream for ResponseStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Producer {
    adapter: Arc<Adapter>,
    prompt: String,
    options: GenerationOptions,
    fragment_timeout: Duration,
    tx: mpsc::Sender<StreamEvent>,
}

/// The consumer is gone; stop producing.
struct Closed;

impl Producer {
    async fn run(self) {
        let backend = self.adapter.id();
        let mut outcome = StreamOutcome {
            backend,
            real_fragments: 0,
            emitted_fragments: 0,
            fallback_fired: false,
            generation_failed: false,
        };

        if self.forward_upstream(&mut outcome).await.is_err() {
            tracing::debug!(backend = %backend, "Stream consumer went away, stopping");
            return;
        }

        if outcome.real_fragments == 0 {
            tracing::debug!(
                backend = %backend,
                failed = outcome.generation_failed,
                "No real fragments from backend, streaming fallback"
            );
            outcome.fallback_fired = true;
            for fragment in self.adapter.fallback().fragments(&self.prompt) {
                if self.tx.send(StreamEvent::Fragment(fragment)).await.is_err() {
                    return;
                }
                outcome.emitted_fragments += 1;
                outcome.real_fragments += 1;
            }
        }

        let _ = self.tx.send(StreamEvent::End(outcome)).await;
    }

    /// Forward the backend's fragments and record how the backend did.
    async fn forward_upstream(&self, outcome: &mut StreamOutcome) -> Result<(), Closed> {
        let mut upstream = match self
            .adapter
            .open_upstream(&self.prompt, &self.options, self.fragment_timeout)
            .await
        {
            Ok(upstream) => upstream,
            Err(e) => {
                if !e.is_degraded() {
                    outcome.generation_failed = true;
                    self.adapter.record_failure(&e).await;
                }
                return Ok(());
            }
        };

        let mut failure = None;
        loop {
            let next = tokio::select! {
                _ = self.tx.closed() => return Err(Closed),
                next = tokio::time::timeout(self.fragment_timeout, upstream.next()) => next,
            };

            match next {
                Ok(Some(Ok(fragment))) => {
                    let real = fragment.is_real();
                    self.tx
                        .send(StreamEvent::Fragment(fragment))
                        .await
                        .map_err(|_| Closed)?;
                    outcome.emitted_fragments += 1;
                    if real {
                        outcome.real_fragments += 1;
                    }
                }
                Ok(Some(Err(e))) => {
                    failure = Some(e);
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    failure = Some(Error::Timeout(self.fragment_timeout));
                    break;
                }
            }
        }
        drop(upstream);

        match failure {
            Some(e) => {
                outcome.generation_failed = true;
                if outcome.real_fragments > 0 {
                    tracing::debug!(
                        backend = %outcome.backend,
                        fragments = outcome.real_fragments,
                        error = %e,
                        "Backend failed mid-stream, ending with partial output"
                    );
                }
                self.adapter.record_failure(&e).await;
            }
            None if outcome.real_fragments > 0 => self.adapter.record_success().await,
            None => {}
        }
        Ok(())
    }
}
