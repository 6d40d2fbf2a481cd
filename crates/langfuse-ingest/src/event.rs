// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{
    generate_id, millis, EventObservation, Generation, Observation, Score, Span, Tool, Trace,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    TraceCreate,
    SpanCreate,
    SpanUpdate,
    GenerationCreate,
    GenerationUpdate,
    EventCreate,
    ObservationCreate,
    ObservationUpdate,
    ScoreCreate,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TraceCreate => "trace-create",
            EventType::SpanCreate => "span-create",
            EventType::SpanUpdate => "span-update",
            EventType::GenerationCreate => "generation-create",
            EventType::GenerationUpdate => "generation-update",
            EventType::EventCreate => "event-create",
            EventType::ObservationCreate => "observation-create",
            EventType::ObservationUpdate => "observation-update",
            EventType::ScoreCreate => "score-create",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The shaped record carried by an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventBody {
    Trace(Trace),
    Span(Span),
    Generation(Generation),
    Event(EventObservation),
    Observation(Observation),
    Score(Score),
    Tool(Tool),
}

impl From<Trace> for EventBody {
    fn from(value: Trace) -> Self {
        EventBody::Trace(value)
    }
}

impl From<Span> for EventBody {
    fn from(value: Span) -> Self {
        EventBody::Span(value)
    }
}

impl From<Generation> for EventBody {
    fn from(value: Generation) -> Self {
        EventBody::Generation(value)
    }
}

impl From<EventObservation> for EventBody {
    fn from(value: EventObservation) -> Self {
        EventBody::Event(value)
    }
}

impl From<Observation> for EventBody {
    fn from(value: Observation) -> Self {
        EventBody::Observation(value)
    }
}

impl From<Score> for EventBody {
    fn from(value: Score) -> Self {
        EventBody::Score(value)
    }
}

impl From<Tool> for EventBody {
    fn from(value: Tool) -> Self {
        EventBody::Tool(value)
    }
}

/// One envelope queued for delivery. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionEvent {
    id: String,
    #[serde(serialize_with = "millis::serialize")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    event_type: EventType,
    body: EventBody,
}

impl IngestionEvent {
    pub fn new(event_type: EventType, body: impl Into<EventBody>) -> Self {
        Self::with_id(generate_id(), event_type, body)
    }

    pub fn with_id(id: impl Into<String>, event_type: EventType, body: impl Into<EventBody>) -> Self {
        IngestionEvent {
            id: id.into(),
            timestamp: Utc::now(),
            event_type,
            body: body.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn body(&self) -> &EventBody {
        &self.body
    }
}

/// Events drained together for one delivery attempt, in enqueue order.
///
/// A batch is moved from the buffer to the router and on to a runtime. It
/// is never shared between two deliveries.
#[derive(Debug, Default, PartialEq, Serialize)]
pub struct Batch {
    batch: Vec<IngestionEvent>,
}

impl Batch {
    pub fn new(events: Vec<IngestionEvent>) -> Self {
        Batch { batch: events }
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn events(&self) -> &[IngestionEvent] {
        &self.batch
    }

    pub fn into_events(self) -> Vec<IngestionEvent> {
        self.batch
    }

    pub fn ids(&self) -> Vec<&str> {
        self.batch.iter().map(IngestionEvent::id).collect()
    }

    pub fn find(&self, id: &str) -> Option<&IngestionEvent> {
        self.batch.iter().find(|event| event.id == id)
    }

    /// The `{"batch": [...]}` request body.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
