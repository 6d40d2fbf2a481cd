// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ambient trace and span ids for the current task.
//!
//! Producer operations fall back to these ids when a record does not name
//! its trace or parent observation explicitly.

use std::future::Future;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

tokio::task_local! {
    static CONTEXT: TraceContext;
}

/// Runs `fut` with `trace_id` as the current trace. Replaces any enclosing
/// context, span included.
pub async fn with_trace<F>(trace_id: impl Into<String>, fut: F) -> F::Output
where
    F: Future,
{
    let context = TraceContext {
        trace_id: Some(trace_id.into()),
        span_id: None,
    };
    CONTEXT.scope(context, fut).await
}

/// Runs `fut` with `span_id` as the current span, keeping the enclosing trace.
pub async fn with_span<F>(span_id: impl Into<String>, fut: F) -> F::Output
where
    F: Future,
{
    let context = TraceContext {
        span_id: Some(span_id.into()),
        ..current()
    };
    CONTEXT.scope(context, fut).await
}

pub fn current() -> TraceContext {
    CONTEXT.try_with(Clone::clone).unwrap_or_default()
}

pub fn current_trace_id() -> Option<String> {
    CONTEXT
        .try_with(|context| context.trace_id.clone())
        .ok()
        .flatten()
}

pub fn current_span_id() -> Option<String> {
    CONTEXT
        .try_with(|context| context.span_id.clone())
        .ok()
        .flatten()
}
