// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::fmt;
use std::time::Duration;

use crate::dispatch::JobBackend;
use crate::error::Error;

pub const DEFAULT_HOST: &str = "https://us.cloud.langfuse.com";
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_QUEUE_NAME: &str = "langfuse";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Client configuration.
#[derive(Clone)]
pub struct Config {
    /// Langfuse public key (`pk-lf-...`)
    pub public_key: String,
    /// Langfuse secret key (`sk-lf-...`)
    pub secret_key: String,
    /// Base URL of the Langfuse API
    pub host: String,
    /// Events buffered before a flush is triggered
    pub batch_size: usize,
    /// Period of the background flush loop
    pub flush_interval: Duration,
    /// Upper bound on the final flush during shutdown. A flush that is
    /// already sending a request may run for up to `request_timeout` instead
    /// when that is longer.
    pub shutdown_timeout: Duration,
    /// Upper bound on a single ingestion request
    pub request_timeout: Duration,
    /// Log request details at debug level
    pub debug: bool,
    /// Skip registering the process-exit flush
    pub disable_at_exit_hook: bool,
    /// Execution path for batches; `None` auto-detects
    pub job_backend: Option<JobBackend>,
    /// Queue name used by the background runtimes
    pub queue_name: String,
    /// Log level for the embedding binary (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            public_key: String::new(),
            secret_key: String::new(),
            host: DEFAULT_HOST.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            debug: false,
            disable_at_exit_hook: false,
            job_backend: None,
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("public_key", &self.public_key)
            .field("secret_key", &"***")
            .field("host", &self.host)
            .field("batch_size", &self.batch_size)
            .field("flush_interval", &self.flush_interval)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("debug", &self.debug)
            .field("disable_at_exit_hook", &self.disable_at_exit_hook)
            .field("job_backend", &self.job_backend)
            .field("queue_name", &self.queue_name)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    /// Create configuration from `LANGFUSE_*` environment variables.
    ///
    /// Unset or unparsable numeric values keep their defaults. The result
    /// is not validated; the client does that at construction.
    pub fn from_env() -> Result<Self, Error> {
        let defaults = Self::default();

        let public_key = env::var("LANGFUSE_PUBLIC_KEY").unwrap_or_default();
        let secret_key = env::var("LANGFUSE_SECRET_KEY").unwrap_or_default();
        let host = env::var("LANGFUSE_HOST").unwrap_or(defaults.host);
        let batch_size = env::var("LANGFUSE_BATCH_SIZE")
            .ok()
            .and_then(|val| val.trim().parse::<usize>().ok())
            .unwrap_or(defaults.batch_size);
        let flush_interval = env_seconds("LANGFUSE_FLUSH_INTERVAL").unwrap_or(defaults.flush_interval);
        let shutdown_timeout =
            env_seconds("LANGFUSE_SHUTDOWN_TIMEOUT").unwrap_or(defaults.shutdown_timeout);
        let debug = env::var("LANGFUSE_DEBUG")
            .map(|val| val.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let job_backend = match env::var("LANGFUSE_JOB_BACKEND") {
            Ok(val) if !val.trim().is_empty() => Some(val.parse::<JobBackend>()?),
            _ => None,
        };
        let queue_name = env::var("LANGFUSE_QUEUE_NAME").unwrap_or(defaults.queue_name);
        let log_level = env::var("LANGFUSE_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| if debug { "debug" } else { "info" }.to_string());

        Ok(Self {
            public_key,
            secret_key,
            host,
            batch_size,
            flush_interval,
            shutdown_timeout,
            request_timeout: defaults.request_timeout,
            debug,
            disable_at_exit_hook: defaults.disable_at_exit_hook,
            job_backend,
            queue_name,
            log_level,
        })
    }

    /// Validate the configuration, reporting every violation at once.
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();

        if self.public_key.trim().is_empty() {
            errors.push("public_key is required".to_string());
        }
        if self.secret_key.trim().is_empty() {
            errors.push("secret_key is required".to_string());
        }
        if self.host.trim().is_empty() {
            errors.push("host is required".to_string());
        } else if !(self.host.starts_with("http://") || self.host.starts_with("https://")) {
            errors.push("host must start with http:// or https://".to_string());
        }
        if self.batch_size == 0 {
            errors.push("batch_size must be positive".to_string());
        }
        if self.flush_interval.is_zero() {
            errors.push("flush_interval must be positive".to_string());
        }
        if self.queue_name.trim().is_empty() {
            errors.push("queue_name cannot be empty".to_string());
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            errors.push(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(errors))
        }
    }
}

fn env_seconds(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|val| val.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}
