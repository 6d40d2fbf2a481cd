// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The producer-facing handle.
//!
//! A [`LangfuseClient`] owns the event buffer, the dispatch router and the
//! periodic flush loop. It is cheap to clone; every clone feeds the same
//! buffer. Batches leave the buffer when it reaches `batch_size`, when the
//! flush loop wakes up, on an explicit [`LangfuseClient::flush`], and once
//! more during [`LangfuseClient::shutdown`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::buffer::EventBuffer;
use crate::config::Config;
use crate::context;
use crate::dispatch::{DispatchRouter, Dispatched, JobBackend, RuntimeRegistry};
use crate::error::Error;
use crate::event::{EventType, IngestionEvent};
use crate::exit_hook::ExitHooks;
use crate::failure_store::{FailedEventStore, MemoryFailedEventStore};
use crate::models::{
    EventAttributes, EventObservation, Generation, GenerationAttributes, Observation,
    ObservationAttributes, Score, ScoreAttributes, Span, SpanAttributes, Tool, ToolAttributes,
    Trace, TraceAttributes,
};
use crate::transport::{HttpTransport, Transport};

/// Wait after a failed periodic flush before the loop resumes.
pub const FLUSH_ERROR_COOLDOWN: Duration = Duration::from_secs(1);

/// Everything a client is built from.
pub struct ClientParts {
    pub config: Config,
    pub registry: RuntimeRegistry,
    pub transport: Arc<dyn Transport>,
    pub failed_event_store: Arc<dyn FailedEventStore>,
    /// Registry for the process-exit flush. `None` uses [`ExitHooks::global`].
    pub exit_hooks: Option<ExitHooks>,
}

struct ClientInner {
    config: Config,
    buffer: EventBuffer,
    router: DispatchRouter,
    cancel: CancellationToken,
    flush_task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl ClientInner {
    async fn flush(&self) -> Result<Dispatched, Error> {
        let batch = self.buffer.drain();
        if batch.is_empty() {
            return Ok(Dispatched::Skipped);
        }
        debug!("Flushing {} events", batch.len());
        self.router.dispatch(batch).await
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Clone)]
pub struct LangfuseClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for LangfuseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LangfuseClient")
            .field("config", &self.inner.config)
            .field("router", &self.inner.router)
            .field("pending", &self.pending())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl LangfuseClient {
    /// Builds a client that delivers over HTTP and keeps rejected events in
    /// memory. Must be called from within a Tokio runtime.
    pub fn new(config: Config, registry: RuntimeRegistry) -> Result<Self, Error> {
        config.validate()?;
        let transport = Arc::new(HttpTransport::new(&config)?);
        Self::from_parts(ClientParts {
            config,
            registry,
            transport,
            failed_event_store: Arc::new(MemoryFailedEventStore::default()),
            exit_hooks: None,
        })
    }

    pub fn from_parts(parts: ClientParts) -> Result<Self, Error> {
        let ClientParts {
            config,
            registry,
            transport,
            failed_event_store,
            exit_hooks,
        } = parts;

        config.validate()?;
        let handle = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let router = DispatchRouter::new(
            config.job_backend,
            &registry,
            transport,
            failed_event_store,
        )?;

        let flush_interval = config.flush_interval;
        let disable_at_exit_hook = config.disable_at_exit_hook;
        let cancel = CancellationToken::new();
        let inner = Arc::new(ClientInner {
            buffer: EventBuffer::new(config.batch_size),
            config,
            router,
            cancel: cancel.clone(),
            flush_task: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        });

        let task = handle.spawn(flush_loop(Arc::downgrade(&inner), cancel, flush_interval));
        {
            #[allow(clippy::expect_used)]
            let mut flush_task = inner.flush_task.lock().expect("lock poisoned");
            *flush_task = Some(task);
        }

        let client = LangfuseClient { inner };
        if !disable_at_exit_hook {
            let hooks = exit_hooks.unwrap_or_else(|| ExitHooks::global().clone());
            let at_exit = client.clone();
            hooks.register("langfuse-client", move || async move {
                if let Err(e) = at_exit.shutdown().await {
                    error!("Failed to flush Langfuse events at exit: {e}");
                }
            });
        }
        debug!(
            "Langfuse client started: mode={}, batch_size={}, flush_interval={}s",
            client.mode(),
            client.inner.buffer.batch_size(),
            flush_interval.as_secs_f64()
        );

        Ok(client)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn mode(&self) -> JobBackend {
        self.inner.router.mode()
    }

    /// Events buffered and not yet dispatched.
    pub fn pending(&self) -> usize {
        self.inner.buffer.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    pub async fn trace(&self, attributes: TraceAttributes) -> Result<Trace, Error> {
        let trace = Trace::new(attributes);
        self.enqueue(IngestionEvent::new(EventType::TraceCreate, trace.clone()))
            .await?;
        Ok(trace)
    }

    pub async fn span(&self, mut attributes: SpanAttributes) -> Result<Span, Error> {
        apply_context(
            &mut attributes.trace_id,
            &mut attributes.fields.parent_observation_id,
        );
        let span = Span::new(attributes)?;
        self.enqueue(IngestionEvent::new(EventType::SpanCreate, span.clone()))
            .await?;
        Ok(span)
    }

    pub async fn update_span(&self, span: Span) -> Result<Span, Error> {
        span.validate_update()?;
        self.enqueue(IngestionEvent::new(EventType::SpanUpdate, span.clone()))
            .await?;
        Ok(span)
    }

    pub async fn generation(&self, mut attributes: GenerationAttributes) -> Result<Generation, Error> {
        apply_context(
            &mut attributes.trace_id,
            &mut attributes.fields.parent_observation_id,
        );
        let generation = Generation::new(attributes)?;
        self.enqueue(IngestionEvent::new(
            EventType::GenerationCreate,
            generation.clone(),
        ))
        .await?;
        Ok(generation)
    }

    pub async fn update_generation(&self, generation: Generation) -> Result<Generation, Error> {
        generation.validate_update()?;
        self.enqueue(IngestionEvent::new(
            EventType::GenerationUpdate,
            generation.clone(),
        ))
        .await?;
        Ok(generation)
    }

    pub async fn event(&self, mut attributes: EventAttributes) -> Result<EventObservation, Error> {
        apply_context(
            &mut attributes.trace_id,
            &mut attributes.fields.parent_observation_id,
        );
        let event = EventObservation::new(attributes)?;
        self.enqueue(IngestionEvent::new(EventType::EventCreate, event.clone()))
            .await?;
        Ok(event)
    }

    /// Records an observation of a kind picked at runtime. The type must be
    /// set; the trace id and parent fall back to the task context.
    pub async fn observation(
        &self,
        mut attributes: ObservationAttributes,
    ) -> Result<Observation, Error> {
        apply_context(
            &mut attributes.trace_id,
            &mut attributes.fields.parent_observation_id,
        );
        let observation = Observation::new(attributes)?;
        self.enqueue(IngestionEvent::new(
            EventType::ObservationCreate,
            observation.clone(),
        ))
        .await?;
        Ok(observation)
    }

    pub async fn update_observation(&self, observation: Observation) -> Result<Observation, Error> {
        observation.validate_update()?;
        self.enqueue(IngestionEvent::new(
            EventType::ObservationUpdate,
            observation.clone(),
        ))
        .await?;
        Ok(observation)
    }

    pub async fn score(&self, mut attributes: ScoreAttributes) -> Result<Score, Error> {
        if attributes.trace_id.is_none() {
            attributes.trace_id = context::current_trace_id();
        }
        let score = Score::new(attributes)?;
        self.enqueue(IngestionEvent::new(EventType::ScoreCreate, score.clone()))
            .await?;
        Ok(score)
    }

    /// Tool executions travel as spans whose body type is `TOOL`.
    pub async fn tool(&self, mut attributes: ToolAttributes) -> Result<Tool, Error> {
        apply_context(
            &mut attributes.trace_id,
            &mut attributes.fields.parent_observation_id,
        );
        let tool = Tool::new(attributes)?;
        self.enqueue(IngestionEvent::new(EventType::SpanCreate, tool.clone()))
            .await?;
        Ok(tool)
    }

    pub async fn update_tool(&self, tool: Tool) -> Result<Tool, Error> {
        tool.validate_update()?;
        self.enqueue(IngestionEvent::new(EventType::SpanUpdate, tool.clone()))
            .await?;
        Ok(tool)
    }

    /// Buffers an event, dispatching the buffer if it just reached
    /// `batch_size`. In synchronous mode a size-triggered flush delivers
    /// before this returns, and delivery errors surface here.
    pub async fn enqueue(&self, event: IngestionEvent) -> Result<(), Error> {
        if self.is_shut_down() {
            warn!(
                "Event {} enqueued after shutdown; it is only sent by an explicit flush",
                event.id()
            );
        }
        if let Some(batch) = self.inner.buffer.push(event) {
            debug!("Batch size reached, dispatching {} events", batch.len());
            self.inner.router.dispatch(batch).await?;
        }
        Ok(())
    }

    /// Drains the buffer and dispatches whatever was in it.
    pub async fn flush(&self) -> Result<Dispatched, Error> {
        self.inner.flush().await
    }

    /// Stops the flush loop and dispatches the remaining events. Only the
    /// first call does anything; later calls return `Ok(())` immediately.
    ///
    /// The final flush is bounded by the larger of `shutdown_timeout` and
    /// `request_timeout`.
    pub async fn shutdown(&self) -> Result<(), Error> {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Shutting down Langfuse client");

        let timeout = self.inner.config.shutdown_timeout;
        self.inner.cancel.cancel();
        let task = {
            #[allow(clippy::expect_used)]
            let mut flush_task = self.inner.flush_task.lock().expect("lock poisoned");
            flush_task.take()
        };
        if let Some(task) = task {
            match tokio::time::timeout(timeout, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Flush loop terminated abnormally: {e}"),
                Err(_) => warn!(
                    "Flush loop still running after {} ms",
                    timeout.as_millis()
                ),
            }
        }

        // A request in flight may take the full request timeout.
        let flush_timeout = timeout.max(self.inner.config.request_timeout);
        match tokio::time::timeout(flush_timeout, self.inner.flush()).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => {
                error!(
                    "Final flush did not complete within {} ms",
                    flush_timeout.as_millis()
                );
                Err(Error::ShutdownTimeout)
            }
        }
    }
}

/// Fills a missing trace id from the task context, and a missing parent from
/// the current span when the record belongs to the context's trace.
fn apply_context(trace_id: &mut Option<String>, parent_observation_id: &mut Option<String>) {
    let current = context::current();
    if trace_id.is_none() {
        trace_id.clone_from(&current.trace_id);
    }
    if parent_observation_id.is_none() && trace_id.is_some() && *trace_id == current.trace_id {
        *parent_observation_id = current.span_id;
    }
}

async fn flush_loop(inner: Weak<ClientInner>, cancel: CancellationToken, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(client) = inner.upgrade() else {
            break;
        };
        let result = client.flush().await;
        drop(client);

        if let Err(e) = result {
            error!("Periodic flush failed: {e}");
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(FLUSH_ERROR_COOLDOWN) => {}
            }
        }
    }

    debug!("Flush loop stopped");
}
