// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::dispatch::JobBackend;
use crate::transport::TransportError;
use crate::worker::JobError;

/// Errors surfaced to the producer call site.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Langfuse configuration errors:\n  {}", .0.join("\n  "))]
    Config(Vec<String>),

    #[error("Unknown job backend: {0}")]
    UnknownBackend(String),

    #[error("{0} job runtime is not registered")]
    RuntimeUnavailable(JobBackend),

    #[error("A Tokio runtime is required to start the Langfuse client")]
    NoRuntime,

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Failed to submit batch: {0}")]
    Submit(String),

    #[error("Shutdown timeout exceeded")]
    ShutdownTimeout,
}

impl Error {
    /// Configuration errors are fatal and never worth retrying.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::UnknownBackend(_)
                | Error::RuntimeUnavailable(_)
                | Error::NoRuntime
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_lists_every_violation() {
        let error = Error::Config(vec![
            "public_key is required".to_string(),
            "secret_key is required".to_string(),
        ]);
        assert_eq!(
            error.to_string(),
            "Langfuse configuration errors:\n  public_key is required\n  secret_key is required"
        );
    }

    #[test]
    fn test_error_display() {
        let error = Error::UnknownBackend("rabbitmq".to_string());
        assert_eq!(error.to_string(), "Unknown job backend: rabbitmq");

        let error = Error::RuntimeUnavailable(JobBackend::Generic);
        assert_eq!(error.to_string(), "generic job runtime is not registered");
    }

    #[test]
    fn test_is_config() {
        assert!(Error::Config(vec![]).is_config());
        assert!(Error::UnknownBackend("x".into()).is_config());
        assert!(Error::RuntimeUnavailable(JobBackend::Framework).is_config());
        assert!(Error::NoRuntime.is_config());
        assert!(!Error::ShutdownTimeout.is_config());
        assert!(!Error::Submit("closed".into()).is_config());
    }
}
