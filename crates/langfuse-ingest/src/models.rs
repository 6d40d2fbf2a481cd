// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Typed observation records and their wire shape.
//!
//! Every record is built from an attribute struct. Construction assigns a
//! UUID v4 identifier and a start time when the caller leaves them unset,
//! and rejects records that cannot be attached to a trace. Serialization
//! produces the camelCase JSON body the ingestion API expects, omitting
//! unset fields.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::Error;

pub(crate) mod millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::Serializer;

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObservationLevel {
    Debug,
    Default,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObservationType {
    Span,
    Generation,
    Event,
    Tool,
}

/// Fields shared by every observation kind. Opaque to the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<ObservationLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_observation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// `TOKENS`, `CHARACTERS`, `MILLISECONDS`, ...
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceAttributes {
    pub id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub metadata: Option<Value>,
    pub tags: Option<Vec<String>>,
    pub release: Option<String>,
    pub version: Option<String>,
    pub environment: Option<String>,
    pub public: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub id: String,
    #[serde(serialize_with = "millis::serialize")]
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public: Option<bool>,
}

impl Trace {
    pub fn new(attributes: TraceAttributes) -> Self {
        Trace {
            id: attributes.id.unwrap_or_else(generate_id),
            timestamp: attributes.timestamp.unwrap_or_else(Utc::now),
            name: attributes.name,
            user_id: attributes.user_id,
            session_id: attributes.session_id,
            input: attributes.input,
            output: attributes.output,
            metadata: attributes.metadata,
            tags: attributes.tags,
            release: attributes.release,
            version: attributes.version,
            environment: attributes.environment,
            public: attributes.public,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanAttributes {
    pub id: Option<String>,
    pub trace_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub fields: ObservationFields,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub id: String,
    pub trace_id: String,
    #[serde(rename = "type")]
    pub observation_type: ObservationType,
    #[serde(serialize_with = "millis::serialize")]
    pub start_time: DateTime<Utc>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "millis::option::serialize"
    )]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: ObservationFields,
}

impl Span {
    pub fn new(attributes: SpanAttributes) -> Result<Self, Error> {
        Ok(Span {
            id: attributes.id.unwrap_or_else(generate_id),
            trace_id: require_trace_id("span", attributes.trace_id)?,
            observation_type: ObservationType::Span,
            start_time: attributes.start_time.unwrap_or_else(Utc::now),
            end_time: attributes.end_time,
            fields: attributes.fields,
        })
    }

    pub fn validate_update(&self) -> Result<(), Error> {
        require_identity("span", &self.id, &self.trace_id)
    }
}

/// Model invocation details carried by a generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_parameters: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_version: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationAttributes {
    pub id: Option<String>,
    pub trace_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub completion_start_time: Option<DateTime<Utc>>,
    pub fields: ObservationFields,
    pub model: ModelFields,
}

/// A model invocation.
///
/// Tool definitions in the input and tool calls in the output are written in
/// the OpenAI function-calling shape whenever the record is serialized, so
/// fields filled in after construction are normalized too.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub id: String,
    pub trace_id: String,
    pub observation_type: ObservationType,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub completion_start_time: Option<DateTime<Utc>>,
    pub fields: ObservationFields,
    pub model: ModelFields,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationWire<'a> {
    id: &'a str,
    trace_id: &'a str,
    #[serde(rename = "type")]
    observation_type: ObservationType,
    #[serde(serialize_with = "millis::serialize")]
    start_time: DateTime<Utc>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "millis::option::serialize"
    )]
    end_time: Option<DateTime<Utc>>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "millis::option::serialize"
    )]
    completion_start_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    fields: ObservationFields,
    #[serde(flatten)]
    model: &'a ModelFields,
}

impl Serialize for Generation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut fields = self.fields.clone();
        fields.input = fields.input.map(normalize_tool_definitions);
        fields.output = fields.output.map(normalize_tool_calls);

        GenerationWire {
            id: &self.id,
            trace_id: &self.trace_id,
            observation_type: self.observation_type,
            start_time: self.start_time,
            end_time: self.end_time,
            completion_start_time: self.completion_start_time,
            fields,
            model: &self.model,
        }
        .serialize(serializer)
    }
}

impl Generation {
    pub fn new(attributes: GenerationAttributes) -> Result<Self, Error> {
        Ok(Generation {
            id: attributes.id.unwrap_or_else(generate_id),
            trace_id: require_trace_id("generation", attributes.trace_id)?,
            observation_type: ObservationType::Generation,
            start_time: attributes.start_time.unwrap_or_else(Utc::now),
            end_time: attributes.end_time,
            completion_start_time: attributes.completion_start_time,
            fields: attributes.fields,
            model: attributes.model,
        })
    }

    pub fn validate_update(&self) -> Result<(), Error> {
        require_identity("generation", &self.id, &self.trace_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventAttributes {
    pub id: Option<String>,
    pub trace_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub fields: ObservationFields,
}

/// A point-in-time observation. Has no end time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventObservation {
    pub id: String,
    pub trace_id: String,
    #[serde(rename = "type")]
    pub observation_type: ObservationType,
    #[serde(serialize_with = "millis::serialize")]
    pub start_time: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: ObservationFields,
}

impl EventObservation {
    pub fn new(attributes: EventAttributes) -> Result<Self, Error> {
        Ok(EventObservation {
            id: attributes.id.unwrap_or_else(generate_id),
            trace_id: require_trace_id("event", attributes.trace_id)?,
            observation_type: ObservationType::Event,
            start_time: attributes.start_time.unwrap_or_else(Utc::now),
            fields: attributes.fields,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolAttributes {
    pub id: Option<String>,
    pub trace_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub fields: ObservationFields,
    pub tool_name: Option<String>,
    pub tool_call_id: Option<String>,
    pub arguments: Option<Value>,
}

/// Execution of a single tool call requested by a generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub id: String,
    pub trace_id: String,
    #[serde(rename = "type")]
    pub observation_type: ObservationType,
    #[serde(serialize_with = "millis::serialize")]
    pub start_time: DateTime<Utc>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "millis::option::serialize"
    )]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: ObservationFields,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl Tool {
    pub fn new(attributes: ToolAttributes) -> Result<Self, Error> {
        Ok(Tool {
            id: attributes.id.unwrap_or_else(generate_id),
            trace_id: require_trace_id("tool", attributes.trace_id)?,
            observation_type: ObservationType::Tool,
            start_time: attributes.start_time.unwrap_or_else(Utc::now),
            end_time: attributes.end_time,
            fields: attributes.fields,
            tool_name: attributes.tool_name,
            tool_call_id: attributes.tool_call_id,
            arguments: attributes.arguments,
        })
    }

    pub fn validate_update(&self) -> Result<(), Error> {
        require_identity("tool", &self.id, &self.trace_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationAttributes {
    pub id: Option<String>,
    pub trace_id: Option<String>,
    pub observation_type: Option<ObservationType>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub completion_start_time: Option<DateTime<Utc>>,
    pub fields: ObservationFields,
    pub model: ModelFields,
    pub prompt_id: Option<String>,
}

/// An observation whose kind is chosen by the caller at runtime.
///
/// Only the fields that belong to its kind reach the wire: generations carry
/// timing and model fields, spans and tools an end time, and events neither.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub id: String,
    pub trace_id: String,
    pub observation_type: ObservationType,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub completion_start_time: Option<DateTime<Utc>>,
    pub fields: ObservationFields,
    pub model: ModelFields,
    pub prompt_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ObservationWire<'a> {
    id: &'a str,
    trace_id: &'a str,
    #[serde(rename = "type")]
    observation_type: ObservationType,
    #[serde(serialize_with = "millis::serialize")]
    start_time: DateTime<Utc>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "millis::option::serialize"
    )]
    end_time: Option<DateTime<Utc>>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "millis::option::serialize"
    )]
    completion_start_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    fields: &'a ObservationFields,
    #[serde(flatten)]
    model: Option<&'a ModelFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_id: Option<&'a str>,
}

impl Serialize for Observation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut wire = ObservationWire {
            id: &self.id,
            trace_id: &self.trace_id,
            observation_type: self.observation_type,
            start_time: self.start_time,
            end_time: None,
            completion_start_time: None,
            fields: &self.fields,
            model: None,
            prompt_id: None,
        };
        match self.observation_type {
            ObservationType::Generation => {
                wire.end_time = self.end_time;
                wire.completion_start_time = self.completion_start_time;
                wire.model = Some(&self.model);
                wire.prompt_id = self.prompt_id.as_deref();
            }
            ObservationType::Span | ObservationType::Tool => wire.end_time = self.end_time,
            ObservationType::Event => {}
        }
        wire.serialize(serializer)
    }
}

impl Observation {
    pub fn new(attributes: ObservationAttributes) -> Result<Self, Error> {
        let trace_id = match attributes.trace_id {
            Some(trace_id) if !trace_id.is_empty() => trace_id,
            _ => {
                return Err(Error::InvalidRecord(
                    "trace_id is required for creating an observation".to_string(),
                ))
            }
        };
        let Some(observation_type) = attributes.observation_type else {
            return Err(Error::InvalidRecord(
                "type is required (SPAN, GENERATION, or EVENT)".to_string(),
            ));
        };

        Ok(Observation {
            id: attributes.id.unwrap_or_else(generate_id),
            trace_id,
            observation_type,
            start_time: attributes.start_time.unwrap_or_else(Utc::now),
            end_time: attributes.end_time,
            completion_start_time: attributes.completion_start_time,
            fields: attributes.fields,
            model: attributes.model,
            prompt_id: attributes.prompt_id,
        })
    }

    pub fn validate_update(&self) -> Result<(), Error> {
        if self.id.is_empty() {
            return Err(Error::InvalidRecord(
                "observation.id is required for updating an observation".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScoreValue {
    Numeric(f64),
    Categorical(String),
}

impl Default for ScoreValue {
    fn default() -> Self {
        ScoreValue::Numeric(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScoreDataType {
    Numeric,
    Categorical,
    Boolean,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreAttributes {
    pub id: Option<String>,
    pub trace_id: Option<String>,
    pub observation_id: Option<String>,
    pub name: String,
    pub value: ScoreValue,
    pub data_type: Option<ScoreDataType>,
    pub comment: Option<String>,
    pub environment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub id: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation_id: Option<String>,
    pub name: String,
    pub value: ScoreValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<ScoreDataType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

impl Score {
    pub fn new(attributes: ScoreAttributes) -> Result<Self, Error> {
        let trace_id = require_trace_id("score", attributes.trace_id)?;
        if attributes.name.trim().is_empty() {
            return Err(Error::InvalidRecord(
                "name is required for creating a score".to_string(),
            ));
        }
        Ok(Score {
            id: attributes.id.unwrap_or_else(generate_id),
            trace_id,
            observation_id: attributes.observation_id,
            name: attributes.name,
            value: attributes.value,
            data_type: attributes.data_type,
            comment: attributes.comment,
            environment: attributes.environment,
        })
    }
}

pub(crate) fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

fn require_trace_id(kind: &str, trace_id: Option<String>) -> Result<String, Error> {
    match trace_id {
        Some(trace_id) if !trace_id.is_empty() => Ok(trace_id),
        _ => Err(Error::InvalidRecord(format!(
            "trace_id is required for creating a {kind}"
        ))),
    }
}

fn require_identity(kind: &str, id: &str, trace_id: &str) -> Result<(), Error> {
    if id.is_empty() || trace_id.is_empty() {
        return Err(Error::InvalidRecord(format!(
            "{kind}.id and {kind}.trace_id are required for updating a {kind}"
        )));
    }
    Ok(())
}

fn present<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).filter(|value| !value.is_null())
}

fn compact(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(map.into_iter().filter(|(_, v)| !v.is_null()).collect()),
        other => other,
    }
}

fn normalize_tool_definitions(input: Value) -> Value {
    let Value::Object(mut map) = input else {
        return input;
    };
    if let Some(Value::Array(tools)) = map.get_mut("tools") {
        for tool in tools.iter_mut() {
            *tool = format_tool(std::mem::take(tool));
        }
    }
    Value::Object(map)
}

fn format_tool(tool: Value) -> Value {
    let Value::Object(map) = &tool else {
        return tool;
    };
    if present(map, "type").is_some() && present(map, "function").is_some() {
        return tool;
    }
    let function = match present(map, "function") {
        Some(function) => function.clone(),
        None => compact(json!({
            "name": present(map, "name"),
            "description": present(map, "description"),
            "parameters": present(map, "parameters"),
        })),
    };
    json!({
        "type": present(map, "type").cloned().unwrap_or_else(|| json!("function")),
        "function": function,
    })
}

fn normalize_tool_calls(output: Value) -> Value {
    let Value::Object(mut map) = output else {
        return output;
    };
    if let Some(Value::Array(calls)) = map.get_mut("tool_calls") {
        for call in calls.iter_mut() {
            *call = format_tool_call(std::mem::take(call));
        }
    }
    Value::Object(map)
}

fn format_tool_call(call: Value) -> Value {
    let Value::Object(map) = &call else {
        return call;
    };
    let function = present(map, "function");
    compact(json!({
        "id": present(map, "id"),
        "type": present(map, "type").cloned().unwrap_or_else(|| json!("function")),
        "function": compact(json!({
            "name": function.and_then(|f| f.get("name")),
            "arguments": function.and_then(|f| f.get("arguments")),
        })),
    }))
}
