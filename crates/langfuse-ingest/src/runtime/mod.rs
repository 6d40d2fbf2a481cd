// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process job runtimes that deliver batches in the background.
//!
//! Both runtimes are thin shells around [`worker::perform`]: they own a
//! [`RetryPolicy`] and apply it the same way, so retry semantics cannot
//! drift between them.

pub mod framework;
pub mod generic;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;
use crate::event::Batch;
use crate::failure_store::FailedEventStore;
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use crate::worker::{self, DeliveryOutcome, JobError};

pub use framework::FrameworkJobRuntime;
pub use generic::{JobQueueConfig, JobQueueHandle, JobQueueService, QueueStats};

/// A background execution environment the dispatch router can hand batches to.
pub trait JobRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    fn queue_name(&self) -> &str;

    /// Accepts a batch for later delivery. Returns once the job is queued,
    /// not once it is delivered.
    fn submit(&self, batch: Batch) -> Result<(), Error>;
}

/// What every job needs to run the delivery contract.
pub(crate) struct JobContext {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) store: Arc<dyn FailedEventStore>,
    pub(crate) policy: RetryPolicy,
    pub(crate) cancel: CancellationToken,
}

impl JobContext {
    pub(crate) async fn execute(
        &self,
        job_name: &str,
        batch: Batch,
    ) -> Result<DeliveryOutcome, JobError> {
        let run = self.policy.run(job_name, |attempt| {
            debug!("{job_name} | Attempt {attempt} for {} events", batch.len());
            worker::perform(&batch, self.transport.as_ref(), self.store.as_ref())
        });

        tokio::select! {
            result = run => result,
            () = self.cancel.cancelled() => {
                warn!("{job_name} | Cancelled with {} undelivered events", batch.len());
                Err(JobError::Cancelled { undelivered: batch.len() })
            }
        }
    }
}
