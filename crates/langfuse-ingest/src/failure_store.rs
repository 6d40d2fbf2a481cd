// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Side channel for events the API rejected permanently.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::event::IngestionEvent;

pub const FAILED_EVENTS_KEY: &str = "langfuse:failed_events";

pub const FAILED_EVENTS_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedEvent {
    pub event: serde_json::Value,
    pub error: String,
    #[serde(serialize_with = "crate::models::millis::serialize")]
    pub timestamp: DateTime<Utc>,
}

impl FailedEvent {
    pub fn new(event: &IngestionEvent, error: impl Into<String>) -> Self {
        FailedEvent {
            event: serde_json::to_value(event).unwrap_or_default(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Keyed list store with bounded retention. Implementations own their
/// serialization; callers never hold a lock across a push.
#[async_trait]
pub trait FailedEventStore: Send + Sync {
    async fn push(&self, failed: FailedEvent);

    async fn list(&self) -> Vec<FailedEvent>;
}

#[derive(Debug)]
pub struct MemoryFailedEventStore {
    key: String,
    retention: Duration,
    entries: Mutex<HashMap<String, Vec<FailedEvent>>>,
}

impl Default for MemoryFailedEventStore {
    fn default() -> Self {
        Self::new(
            FAILED_EVENTS_KEY,
            Duration::days(FAILED_EVENTS_RETENTION_DAYS),
        )
    }
}

impl MemoryFailedEventStore {
    pub fn new(key: impl Into<String>, retention: Duration) -> Self {
        MemoryFailedEventStore {
            key: key.into(),
            retention,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl FailedEventStore for MemoryFailedEventStore {
    async fn push(&self, failed: FailedEvent) {
        let cutoff = Utc::now() - self.retention;
        #[allow(clippy::expect_used)]
        let mut entries = self.entries.lock().expect("lock poisoned");
        let list = entries.entry(self.key.clone()).or_default();
        list.retain(|entry| entry.timestamp > cutoff);
        list.push(failed);
    }

    async fn list(&self) -> Vec<FailedEvent> {
        let cutoff = Utc::now() - self.retention;
        #[allow(clippy::expect_used)]
        let entries = self.entries.lock().expect("lock poisoned");
        entries
            .get(&self.key)
            .map(|list| {
                list.iter()
                    .filter(|entry| entry.timestamp > cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
