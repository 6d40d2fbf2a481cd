// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of a batch to `POST {host}/api/public/ingestion`.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer};
use tracing::{debug, error};

use crate::config::Config;
use crate::error::Error;
use crate::event::Batch;
use crate::http::build_client;

pub const INGESTION_PATH: &str = "/api/public/ingestion";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection refused, DNS failure, timeout. Always worth retrying.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error: {status} {message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode ingestion response: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

/// Body of a 2xx / 207 response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IngestionResponse {
    #[serde(default)]
    pub successes: Vec<IngestionSuccess>,
    #[serde(default)]
    pub errors: Vec<IngestionFailure>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IngestionSuccess {
    pub id: String,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<u16>,
}

/// A per-event rejection inside an otherwise successful response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IngestionFailure {
    pub id: String,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl IngestionFailure {
    pub fn message(&self) -> String {
        match (&self.message, &self.error) {
            (Some(message), _) => message.clone(),
            (None, Some(serde_json::Value::String(error))) => error.clone(),
            (None, Some(error)) => error.to_string(),
            (None, None) => String::new(),
        }
    }
}

// Status codes come back as numbers, but tolerate "404" and junk.
fn lenient_status<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn ingest(&self, batch: &Batch) -> Result<IngestionResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    public_key: String,
    secret_key: String,
    debug: bool,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = build_client(config.request_timeout).map_err(|e| {
            Error::Config(vec![format!("failed to build HTTP client: {e}")])
        })?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: &Config) -> Self {
        HttpTransport {
            client,
            endpoint: format!("{}{}", config.host.trim_end_matches('/'), INGESTION_PATH),
            public_key: config.public_key.clone(),
            secret_key: config.secret_key.clone(),
            debug: config.debug,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn log_request(&self, batch: &Batch) {
        debug!(
            "Using basic auth (public_key: {}, secret_key: {})",
            self.public_key,
            mask(&self.secret_key, 8)
        );
        debug!(
            "Sending {} events to Langfuse API at {}",
            batch.len(),
            self.endpoint
        );
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn ingest(&self, batch: &Batch) -> Result<IngestionResponse, TransportError> {
        if self.debug {
            self.log_request(batch);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .json(batch)
            .send()
            .await
            .map_err(|e| {
                error!("Error during API request: {e}");
                TransportError::Network(e)
            })?;

        let status = response.status();
        if status == StatusCode::MULTI_STATUS || status.is_success() {
            if self.debug {
                debug!("Received response: {}", status.as_u16());
            }
            let body = response.bytes().await?;
            return parse_response(&body);
        }

        let message = status.canonical_reason().unwrap_or("Unknown").to_string();
        if self.debug {
            let body = response.text().await.unwrap_or_default();
            error!("Response body: {body}");
            error!("Request URL: {}", self.endpoint);
        }
        let err = TransportError::Api {
            status: status.as_u16(),
            message,
        };
        error!("{err}");
        Err(err)
    }
}

pub(crate) fn parse_response(body: &[u8]) -> Result<IngestionResponse, TransportError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(IngestionResponse::default());
    }
    serde_json::from_slice(body).map_err(|e| TransportError::Decode(e.to_string()))
}

fn mask(secret: &str, visible: usize) -> String {
    if secret.is_empty() {
        return "nil".to_string();
    }
    let prefix: String = secret.chars().take(visible).collect();
    format!("{prefix}...")
}
