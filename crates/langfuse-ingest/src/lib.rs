// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client-side pipeline that buffers Langfuse observability events and
//! delivers them in batches to the ingestion endpoint.
//!
//! ```text
//!   producers ──> EventBuffer ──(size / timer)──> DispatchRouter
//!                                                   │
//!                       ┌───────────────────────────┼──────────────────────┐
//!                       v                           v                      v
//!                  synchronous             generic job queue     framework job runtime
//!                       │                           │                      │
//!                       └────────> worker::perform (retry / classify) <────┘
//!                                               │
//!                                               v
//!                                     Transport ──> /api/public/ingestion
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod buffer;
pub mod client;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod exit_hook;
pub mod failure_store;
pub mod http;
pub mod logger;
pub mod models;
pub mod retry;
pub mod runtime;
pub mod transport;
pub mod worker;

pub use client::{ClientParts, LangfuseClient};
pub use config::Config;
pub use dispatch::{DispatchRouter, Dispatched, JobBackend, RuntimeRegistry};
pub use error::Error;
pub use event::{Batch, EventBody, EventType, IngestionEvent};
