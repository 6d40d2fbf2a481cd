// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use super::generic::QueueStats;
use super::{JobContext, JobRuntime};
use crate::error::Error;
use crate::event::Batch;
use crate::failure_store::FailedEventStore;
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use crate::worker::JobError;

#[derive(Debug, Default)]
struct JobCounters {
    enqueued: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Runs each batch as its own task on the host application's Tokio runtime.
///
/// Retries back off exponentially: 3 s, 6 s, 12 s, ... capped at 5 minutes.
pub struct FrameworkJobRuntime {
    queue_name: String,
    job_name: String,
    handle: Handle,
    tracker: TaskTracker,
    context: Arc<JobContext>,
    counters: Arc<JobCounters>,
}

impl std::fmt::Debug for FrameworkJobRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameworkJobRuntime")
            .field("queue_name", &self.queue_name)
            .field("in_flight", &self.tracker.len())
            .field("closed", &self.tracker.is_closed())
            .finish()
    }
}

impl FrameworkJobRuntime {
    /// Must be called from within a Tokio runtime; jobs run on that runtime.
    pub fn new(
        queue_name: impl Into<String>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn FailedEventStore>,
    ) -> Result<Self, Error> {
        let handle = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let queue_name = queue_name.into();
        Ok(FrameworkJobRuntime {
            job_name: format!("BatchIngestionJob[{queue_name}]"),
            queue_name,
            handle,
            tracker: TaskTracker::new(),
            context: Arc::new(JobContext {
                transport,
                store,
                policy: RetryPolicy::exponential(Duration::from_secs(3), Duration::from_secs(300)),
                cancel: CancellationToken::new(),
            }),
            counters: Arc::new(JobCounters::default()),
        })
    }

    /// Replaces the retry policy. Only valid before the first submit.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        if let Some(context) = Arc::get_mut(&mut self.context) {
            context.policy = policy;
        }
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.context.policy
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            in_flight: self.tracker.len(),
        }
    }

    /// Stops intake. Jobs already submitted keep running.
    pub fn shutdown(&self) {
        self.tracker.close();
    }

    /// Waits until intake is closed and every submitted job has finished.
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }

    /// Drops every in-flight job at its next suspension point.
    pub fn cancel(&self) {
        self.tracker.close();
        self.context.cancel.cancel();
    }
}

impl JobRuntime for FrameworkJobRuntime {
    fn name(&self) -> &'static str {
        "framework"
    }

    fn queue_name(&self) -> &str {
        &self.queue_name
    }

    fn submit(&self, batch: Batch) -> Result<(), Error> {
        if self.tracker.is_closed() {
            return Err(Error::Submit(format!(
                "framework runtime for queue '{}' is shut down",
                self.queue_name
            )));
        }

        debug!("{} | Enqueued job with {} events", self.job_name, batch.len());
        let context = Arc::clone(&self.context);
        let counters = Arc::clone(&self.counters);
        let job_name = self.job_name.clone();
        counters.enqueued.fetch_add(1, Ordering::Relaxed);
        self.tracker.spawn_on(
            async move {
                match context.execute(&job_name, batch).await {
                    Ok(outcome) => {
                        debug!("{job_name} | Job finished: {:?}", outcome.state());
                        counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    }
                    // Already logged when the token fired.
                    Err(JobError::Cancelled { .. }) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        error!("{job_name} | Job failed: {e}");
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            },
            &self.handle,
        );
        Ok(())
    }
}
