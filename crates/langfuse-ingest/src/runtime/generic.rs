// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Named job queue with a fixed pool of workers.
//!
//! The service owns the receiving end of an unbounded channel. Each batch
//! becomes one job; at most `workers` jobs talk to the transport at a time.
//! Jobs retry on a linear schedule (10 s, 20 s, ...) by default.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{JobContext, JobRuntime};
use crate::config::DEFAULT_QUEUE_NAME;
use crate::error::Error;
use crate::event::Batch;
use crate::failure_store::FailedEventStore;
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use crate::worker::{DeliveryOutcome, JobError};

pub const DEFAULT_WORKERS: usize = 5;

pub const DEFAULT_RETRY_STEP: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum JobQueueCommand {
    Perform(Batch),
    Stats(oneshot::Sender<QueueStats>),
    Shutdown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub in_flight: usize,
}

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    pub queue_name: String,
    pub workers: usize,
    pub retry_policy: RetryPolicy,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        JobQueueConfig {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            workers: DEFAULT_WORKERS,
            retry_policy: RetryPolicy::linear(DEFAULT_RETRY_STEP),
        }
    }
}

#[derive(Clone, Debug)]
pub struct JobQueueHandle {
    queue_name: String,
    tx: mpsc::UnboundedSender<JobQueueCommand>,
    cancel: CancellationToken,
}

impl JobQueueHandle {
    pub fn perform_async(
        &self,
        batch: Batch,
    ) -> Result<(), mpsc::error::SendError<JobQueueCommand>> {
        self.tx.send(JobQueueCommand::Perform(batch))
    }

    pub async fn stats(&self) -> Result<QueueStats, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(JobQueueCommand::Stats(response_tx))
            .map_err(|e| format!("Failed to send stats command: {}", e))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive stats response: {}", e))
    }

    /// Stops intake. Jobs already queued run to completion.
    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<JobQueueCommand>> {
        self.tx.send(JobQueueCommand::Shutdown)
    }

    /// Drops every queued and in-flight job.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl JobRuntime for JobQueueHandle {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn queue_name(&self) -> &str {
        &self.queue_name
    }

    fn submit(&self, batch: Batch) -> Result<(), Error> {
        self.perform_async(batch)
            .map_err(|_| Error::Submit(format!("job queue '{}' is closed", self.queue_name)))
    }
}

pub struct JobQueueService {
    job_name: String,
    rx: mpsc::UnboundedReceiver<JobQueueCommand>,
    context: Arc<JobContext>,
    permits: Arc<Semaphore>,
    jobs: JoinSet<Result<DeliveryOutcome, JobError>>,
    stats: QueueStats,
}

impl JobQueueService {
    pub fn new(
        config: JobQueueConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn FailedEventStore>,
    ) -> (Self, JobQueueHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let service = Self {
            job_name: format!("BatchIngestionJob[{}]", config.queue_name),
            rx,
            context: Arc::new(JobContext {
                transport,
                store,
                policy: config.retry_policy,
                cancel: cancel.clone(),
            }),
            permits: Arc::new(Semaphore::new(config.workers.max(1))),
            jobs: JoinSet::new(),
            stats: QueueStats::default(),
        };

        let handle = JobQueueHandle {
            queue_name: config.queue_name,
            tx,
            cancel,
        };

        (service, handle)
    }

    pub async fn run(mut self) {
        debug!("{} | Job queue started", self.job_name);

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(JobQueueCommand::Perform(batch)) => self.spawn_job(batch),
                    Some(JobQueueCommand::Stats(response_tx)) => {
                        if response_tx.send(self.current_stats()).is_err() {
                            error!("Failed to send stats response - receiver dropped");
                        }
                    }
                    Some(JobQueueCommand::Shutdown) | None => {
                        debug!("{} | Job queue shutting down", self.job_name);
                        break;
                    }
                },
                Some(joined) = self.jobs.join_next(), if !self.jobs.is_empty() => {
                    self.record(joined);
                }
            }
        }

        self.rx.close();
        while let Some(joined) = self.jobs.join_next().await {
            self.record(joined);
        }

        debug!(
            "{} | Job queue stopped: {} succeeded, {} failed",
            self.job_name, self.stats.succeeded, self.stats.failed
        );
    }

    fn spawn_job(&mut self, batch: Batch) {
        self.stats.enqueued += 1;
        let permits = Arc::clone(&self.permits);
        let context = Arc::clone(&self.context);
        let job_name = self.job_name.clone();

        self.jobs.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return Err(JobError::Discard("worker pool closed".to_string()));
            };
            context.execute(&job_name, batch).await
        });
    }

    fn record(
        &mut self,
        joined: Result<Result<DeliveryOutcome, JobError>, tokio::task::JoinError>,
    ) {
        match joined {
            Ok(Ok(_)) => self.stats.succeeded += 1,
            Ok(Err(_)) => self.stats.failed += 1,
            Err(e) => {
                error!("{} | Failed to join job: {e}", self.job_name);
                self.stats.failed += 1;
            }
        }
    }

    fn current_stats(&self) -> QueueStats {
        QueueStats {
            in_flight: self.jobs.len(),
            ..self.stats
        }
    }
}
