// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use langfuse_ingest::failure_store::{FailedEventStore, MemoryFailedEventStore, FAILED_EVENTS_KEY};
use langfuse_ingest::models::{GenerationAttributes, Trace, TraceAttributes};
use langfuse_ingest::retry::RetryPolicy;
use langfuse_ingest::runtime::{JobQueueConfig, JobQueueService};
use langfuse_ingest::transport::{HttpTransport, TransportError, INGESTION_PATH};
use langfuse_ingest::worker::{self, DeliveryOutcome, JobError};
use langfuse_ingest::{
    Batch, ClientParts, Config, Dispatched, EventType, IngestionEvent, JobBackend,
    LangfuseClient, RuntimeRegistry,
};
use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const BASIC_AUTH: &str = "Basic cGstbGYtdGVzdDpzay1sZi10ZXN0";

fn config(host: String) -> Config {
    Config {
        public_key: "pk-lf-test".to_string(),
        secret_key: "sk-lf-test".to_string(),
        host,
        request_timeout: Duration::from_secs(5),
        disable_at_exit_hook: true,
        job_backend: Some(JobBackend::Synchronous),
        ..Config::default()
    }
}

fn event(id: &str) -> IngestionEvent {
    IngestionEvent::with_id(
        id,
        EventType::TraceCreate,
        Trace::new(TraceAttributes {
            name: Some(format!("trace {id}")),
            ..Default::default()
        }),
    )
}

fn batch(ids: &[&str]) -> Batch {
    Batch::new(ids.iter().map(|id| event(id)).collect())
}

fn contains_id(id: &str) -> Matcher {
    Matcher::Regex(format!(r#""id":"{id}""#))
}

#[tokio::test]
async fn test_batch_size_flush_posts_with_basic_auth() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("POST", INGESTION_PATH)
        .match_header("authorization", BASIC_AUTH)
        .match_header("content-type", "application/json")
        .match_body(Matcher::AllOf(vec![contains_id("e1"), contains_id("e2")]))
        .with_status(207)
        .with_body(r#"{"successes":[{"id":"e1","status":201},{"id":"e2","status":201}],"errors":[]}"#)
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("POST", INGESTION_PATH)
        .match_header("authorization", BASIC_AUTH)
        .match_body(contains_id("e3"))
        .with_status(207)
        .with_body(r#"{"successes":[{"id":"e3","status":201}],"errors":[]}"#)
        .expect(1)
        .create_async()
        .await;

    let mut config = config(server.url());
    config.batch_size = 2;
    let client = LangfuseClient::new(config, RuntimeRegistry::new()).unwrap();

    client.enqueue(event("e1")).await.unwrap();
    client.enqueue(event("e2")).await.unwrap();
    client.enqueue(event("e3")).await.unwrap();
    first.assert_async().await;
    assert_eq!(client.pending(), 1);

    client.shutdown().await.unwrap();
    second.assert_async().await;
}

#[tokio::test]
async fn test_partial_success_stores_only_non_retryable_rejections() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", INGESTION_PATH)
        .with_status(207)
        .with_body(
            r#"{
                "successes": [{"id": "e1", "status": 201}],
                "errors": [
                    {"id": "e2", "status": 404, "message": "Trace not found"},
                    {"id": "e3", "status": 429, "message": "Rate limited"}
                ]
            }"#,
        )
        .create_async()
        .await;

    let transport = HttpTransport::new(&config(server.url())).unwrap();
    let store = MemoryFailedEventStore::default();
    let outcome = worker::perform(&batch(&["e1", "e2", "e3"]), &transport, &store)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(
        outcome,
        DeliveryOutcome::PartiallyAccepted {
            accepted: 1,
            stored: vec!["e2".to_string()],
            retryable: vec!["e3".to_string()],
        }
    );

    let failed = store.list().await;
    assert_eq!(store.key(), FAILED_EVENTS_KEY);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].event["id"], "e2");
    assert_eq!(failed[0].event["type"], "trace-create");
    assert_eq!(failed[0].error, "Trace not found");
}

#[tokio::test]
async fn test_empty_success_body_is_accepted() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", INGESTION_PATH)
        .with_status(200)
        .create_async()
        .await;

    let transport = HttpTransport::new(&config(server.url())).unwrap();
    let store = MemoryFailedEventStore::default();
    let outcome = worker::perform(&batch(&["e1"]), &transport, &store)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(outcome, DeliveryOutcome::Accepted { events: 1 });
}

#[tokio::test]
async fn test_unauthorized_is_discarded_without_retry() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", INGESTION_PATH)
        .with_status(401)
        .with_body(r#"{"message":"Invalid credentials"}"#)
        .expect(1)
        .create_async()
        .await;

    let transport = Arc::new(HttpTransport::new(&config(server.url())).unwrap());
    let store = Arc::new(MemoryFailedEventStore::default());
    let (service, handle) = JobQueueService::new(
        JobQueueConfig {
            retry_policy: RetryPolicy::immediate(5),
            ..JobQueueConfig::default()
        },
        transport,
        store.clone(),
    );
    let service = tokio::spawn(service.run());

    handle.perform_async(batch(&["e1"])).unwrap();
    handle.shutdown().unwrap();
    service.await.unwrap();

    mock.assert_async().await;
    assert!(store.list().await.is_empty());
}

#[tokio::test]
async fn test_synchronous_mode_surfaces_discard() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", INGESTION_PATH)
        .with_status(403)
        .create_async()
        .await;

    let client = LangfuseClient::new(config(server.url()), RuntimeRegistry::new()).unwrap();
    client.enqueue(event("e1")).await.unwrap();

    match client.flush().await {
        Err(langfuse_ingest::Error::Job(JobError::Discard(message))) => {
            assert_eq!(message, "API error: 403 Forbidden");
        }
        other => panic!("expected discard, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_errors_retry_until_exhausted() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", INGESTION_PATH)
        .with_status(500)
        .expect(3)
        .create_async()
        .await;

    let transport = Arc::new(HttpTransport::new(&config(server.url())).unwrap());
    let (service, handle) = JobQueueService::new(
        JobQueueConfig {
            queue_name: "langfuse-test".to_string(),
            workers: 1,
            retry_policy: RetryPolicy::immediate(3),
        },
        transport,
        Arc::new(MemoryFailedEventStore::default()),
    );
    let service = tokio::spawn(service.run());

    handle.perform_async(batch(&["e1", "e2"])).unwrap();
    let stats = loop {
        let stats = handle.stats().await.unwrap();
        if stats.failed == 1 {
            break stats;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert_eq!(stats.enqueued, 1);
    assert_eq!(stats.succeeded, 0);

    handle.shutdown().unwrap();
    service.await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_server_error_recovers_on_retry() {
    let mut server = Server::new_async().await;
    let failing = server
        .mock("POST", INGESTION_PATH)
        .with_status(503)
        .expect(1)
        .create_async()
        .await;

    let transport = HttpTransport::new(&config(server.url())).unwrap();
    let store = MemoryFailedEventStore::default();
    let batch = batch(&["e1"]);

    let first = worker::perform(&batch, &transport, &store).await;
    failing.assert_async().await;
    match first {
        Err(JobError::Retryable(TransportError::Api { status, message })) => {
            assert_eq!(status, 503);
            assert_eq!(message, "Service Unavailable");
        }
        other => panic!("expected retryable API error, got {other:?}"),
    }

    failing.remove_async().await;
    let accepting = server
        .mock("POST", INGESTION_PATH)
        .with_status(207)
        .with_body(r#"{"successes":[{"id":"e1","status":201}],"errors":[]}"#)
        .create_async()
        .await;

    let second = worker::perform(&batch, &transport, &store).await.unwrap();
    accepting.assert_async().await;
    assert_eq!(second, DeliveryOutcome::Accepted { events: 1 });
}

#[tokio::test]
async fn test_network_errors_are_retryable() {
    // Nothing listens on port 1.
    let transport = HttpTransport::new(&config("http://127.0.0.1:1".to_string())).unwrap();
    let store = MemoryFailedEventStore::default();

    let result = worker::perform(&batch(&["e1"]), &transport, &store).await;
    match result {
        Err(err @ JobError::Retryable(TransportError::Network(_))) => {
            assert!(err.to_string().starts_with("Network error: "));
        }
        other => panic!("expected retryable network error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_generic_runtime_delivers_in_background() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", INGESTION_PATH)
        .match_body(Matcher::AllOf(vec![contains_id("e1"), contains_id("e2")]))
        .with_status(207)
        .with_body(r#"{"successes":[],"errors":[]}"#)
        .expect(1)
        .create_async()
        .await;

    let mut config = config(server.url());
    config.job_backend = None;
    let transport = Arc::new(HttpTransport::new(&config).unwrap());
    let store = Arc::new(MemoryFailedEventStore::default());
    let (service, handle) =
        JobQueueService::new(JobQueueConfig::default(), transport.clone(), store.clone());
    let service = tokio::spawn(service.run());

    let mut registry = RuntimeRegistry::new();
    registry.register_generic(Arc::new(handle.clone()));
    let client = LangfuseClient::from_parts(ClientParts {
        config,
        registry,
        transport,
        failed_event_store: store,
        exit_hooks: None,
    })
    .unwrap();
    assert_eq!(client.mode(), JobBackend::Generic);

    client.enqueue(event("e1")).await.unwrap();
    client.enqueue(event("e2")).await.unwrap();
    assert_eq!(
        client.flush().await.unwrap(),
        Dispatched::Enqueued { runtime: "generic" }
    );

    handle.shutdown().unwrap();
    service.await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_generation_update_posts_normalized_tool_calls() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", INGESTION_PATH)
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""type":"generation-update""#.to_string()),
            Matcher::Regex(r#""type":"function""#.to_string()),
        ]))
        .with_status(207)
        .with_body(r#"{"successes":[],"errors":[]}"#)
        .expect(1)
        .create_async()
        .await;

    let client = LangfuseClient::new(config(server.url()), RuntimeRegistry::new()).unwrap();
    let mut generation = client
        .generation(GenerationAttributes {
            trace_id: Some("trace-1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    generation.fields.output = Some(json!({
        "tool_calls": [{"id": "c1", "function": {"name": "f", "arguments": "{}"}}],
    }));
    client.update_generation(generation).await.unwrap();

    client.flush().await.unwrap();
    mock.assert_async().await;
}
