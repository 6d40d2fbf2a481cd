// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The delivery contract every execution path applies to a batch.
//!
//! Errors are classified here, once, right next to the transport call:
//!
//! - network failures are retryable and propagate unchanged;
//! - per-event rejections with a 4xx status other than 429 are written to
//!   the failed event store and never retried; other per-event rejections
//!   are left for a later attempt;
//! - request-level errors whose message carries a 400/401/403/404 marker
//!   become discardable, anything else is retryable.

use tracing::{debug, error, warn};

use crate::event::Batch;
use crate::failure_store::{FailedEvent, FailedEventStore};
use crate::transport::{Transport, TransportError};

const CLIENT_ERROR_MARKERS: [&str; 4] = ["400", "401", "403", "404"];

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Retryable(TransportError),

    #[error("Discarded: {0}")]
    Discard(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: TransportError },

    #[error("Cancelled during shutdown with {undelivered} undelivered events")]
    Cancelled { undelivered: usize },
}

impl JobError {
    pub fn state(&self) -> DeliveryState {
        match self {
            JobError::Retryable(_) => DeliveryState::RejectedRetryable,
            JobError::Discard(_) => DeliveryState::RejectedDiscardable,
            JobError::Exhausted { .. } => DeliveryState::Exhausted,
            JobError::Cancelled { .. } => DeliveryState::Cancelled,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Retryable(_))
    }
}

/// Lifecycle of one delivery attempt of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Submitted,
    Accepted,
    PartiallyAccepted,
    /// Loops back to `Submitted` through the runtime's retry policy.
    RejectedRetryable,
    RejectedDiscardable,
    Exhausted,
    /// The runtime was cancelled before the batch was delivered.
    Cancelled,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            DeliveryState::Submitted | DeliveryState::RejectedRetryable
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Accepted {
        events: usize,
    },
    PartiallyAccepted {
        accepted: usize,
        /// Ids written to the failed event store.
        stored: Vec<String>,
        /// Ids rejected with a retryable status.
        retryable: Vec<String>,
    },
}

impl DeliveryOutcome {
    pub fn state(&self) -> DeliveryState {
        match self {
            DeliveryOutcome::Accepted { .. } => DeliveryState::Accepted,
            DeliveryOutcome::PartiallyAccepted { .. } => DeliveryState::PartiallyAccepted,
        }
    }
}

/// 4xx except 429.
pub fn is_non_retryable_status(status: u16) -> bool {
    (400..500).contains(&status) && status != 429
}

pub fn is_client_error_message(message: &str) -> bool {
    CLIENT_ERROR_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

pub fn classify_transport_error(err: TransportError) -> JobError {
    if let TransportError::Network(_) = err {
        error!("Langfuse network error: {err}");
        return JobError::Retryable(err);
    }
    let message = err.to_string();
    if is_client_error_message(&message) {
        error!("Langfuse client error (not retrying): {message}");
        JobError::Discard(message)
    } else {
        error!("Langfuse API error: {message}");
        JobError::Retryable(err)
    }
}

/// Delivers `batch` once.
pub async fn perform(
    batch: &Batch,
    transport: &dyn Transport,
    store: &dyn FailedEventStore,
) -> Result<DeliveryOutcome, JobError> {
    let response = transport
        .ingest(batch)
        .await
        .map_err(classify_transport_error)?;

    if response.errors.is_empty() {
        debug!("Delivered {} events", batch.len());
        return Ok(DeliveryOutcome::Accepted {
            events: batch.len(),
        });
    }

    let mut stored = Vec::new();
    let mut retryable = Vec::new();
    for failure in &response.errors {
        let message = failure.message();
        match failure.status {
            Some(status) if is_non_retryable_status(status) => {
                error!(
                    "Langfuse API error for event {}: {status} {message}",
                    failure.id
                );
                match batch.find(&failure.id) {
                    Some(event) => {
                        store.push(FailedEvent::new(event, message)).await;
                        stored.push(failure.id.clone());
                    }
                    None => warn!("Rejected event {} is not part of the batch", failure.id),
                }
            }
            status => {
                warn!(
                    "Langfuse API error for event {} (retryable, status {status:?}): {message}",
                    failure.id
                );
                retryable.push(failure.id.clone());
            }
        }
    }

    Ok(DeliveryOutcome::PartiallyAccepted {
        accepted: batch.len().saturating_sub(response.errors.len()),
        stored,
        retryable,
    })
}
