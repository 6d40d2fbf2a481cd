// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use langfuse_ingest::exit_hook::ExitHooks;
use langfuse_ingest::failure_store::MemoryFailedEventStore;
use langfuse_ingest::models::{Trace, TraceAttributes};
use langfuse_ingest::transport::{IngestionResponse, Transport, TransportError, INGESTION_PATH};
use langfuse_ingest::{
    Batch, ClientParts, Config, Error, EventType, IngestionEvent, JobBackend, LangfuseClient,
    RuntimeRegistry,
};
use mockito::Server;
use proptest::prelude::*;
use serial_test::serial;
use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Transport that keeps the id sequence of every batch it receives.
#[derive(Default)]
struct RecordingTransport {
    batches: Mutex<Vec<Vec<String>>>,
}

impl RecordingTransport {
    fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }

    fn delivered(&self) -> Vec<String> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn ingest(&self, batch: &Batch) -> Result<IngestionResponse, TransportError> {
        let ids = batch.ids().into_iter().map(String::from).collect();
        self.batches.lock().unwrap().push(ids);
        Ok(IngestionResponse::default())
    }
}

fn config(batch_size: usize) -> Config {
    Config {
        public_key: "pk-lf-test".to_string(),
        secret_key: "sk-lf-test".to_string(),
        batch_size,
        flush_interval: Duration::from_secs(3600),
        disable_at_exit_hook: true,
        job_backend: Some(JobBackend::Synchronous),
        ..Config::default()
    }
}

fn client(config: Config, transport: Arc<RecordingTransport>) -> LangfuseClient {
    LangfuseClient::from_parts(ClientParts {
        config,
        registry: RuntimeRegistry::new(),
        transport,
        failed_event_store: Arc::new(MemoryFailedEventStore::default()),
        exit_hooks: None,
    })
    .unwrap()
}

fn event(id: &str) -> IngestionEvent {
    IngestionEvent::with_id(
        id,
        EventType::TraceCreate,
        Trace::new(TraceAttributes::default()),
    )
}

#[derive(Debug, Clone)]
enum Step {
    Enqueue,
    Flush,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![4 => Just(Step::Enqueue), 1 => Just(Step::Flush)]
}

proptest! {
    #[test]
    fn test_every_event_is_delivered_exactly_once_in_order(
        batch_size in 1usize..8,
        steps in proptest::collection::vec(step(), 0..60),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (expected, batches) = runtime.block_on(async {
            let transport = Arc::new(RecordingTransport::default());
            let client = client(config(batch_size), transport.clone());

            let mut expected = Vec::new();
            for (i, step) in steps.iter().enumerate() {
                match step {
                    Step::Enqueue => {
                        let id = format!("e{i}");
                        client.enqueue(event(&id)).await.unwrap();
                        expected.push(id);
                    }
                    Step::Flush => {
                        client.flush().await.unwrap();
                    }
                }
            }
            client.shutdown().await.unwrap();
            (expected, transport.batches())
        });

        let delivered: Vec<String> = batches.iter().flatten().cloned().collect();
        prop_assert_eq!(delivered, expected);
        for batch in &batches {
            prop_assert!(!batch.is_empty());
            prop_assert!(batch.len() <= batch_size);
        }
    }
}

#[tokio::test]
async fn test_concurrent_producers_lose_nothing() {
    let transport = Arc::new(RecordingTransport::default());
    let client = client(config(5), transport.clone());

    let producers: Vec<_> = (0..8)
        .map(|producer| {
            let client = client.clone();
            tokio::spawn(async move {
                for i in 0..40 {
                    client
                        .enqueue(event(&format!("p{producer}-{i}")))
                        .await
                        .unwrap();
                    if i % 15 == 0 {
                        client.flush().await.unwrap();
                    }
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }
    client.shutdown().await.unwrap();

    let mut delivered = transport.delivered();
    assert_eq!(delivered.len(), 8 * 40);
    delivered.sort();
    delivered.dedup();
    assert_eq!(delivered.len(), 8 * 40);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_once_and_stops_periodic_flush() {
    let transport = Arc::new(RecordingTransport::default());
    let mut config = config(100);
    config.flush_interval = Duration::from_secs(1);
    let client = client(config, transport.clone());

    client.enqueue(event("e1")).await.unwrap();
    client.enqueue(event("e2")).await.unwrap();

    let (first, second) = tokio::join!(client.shutdown(), client.shutdown());
    first.unwrap();
    second.unwrap();
    assert_eq!(transport.batches(), vec![vec!["e1", "e2"]]);

    client.enqueue(event("e3")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    client.shutdown().await.unwrap();

    assert_eq!(transport.batches().len(), 1);
    assert_eq!(client.pending(), 1);
}

#[tokio::test]
async fn test_exit_hooks_flush_every_registered_client() {
    let hooks = ExitHooks::new();
    let transports: Vec<Arc<RecordingTransport>> =
        (0..2).map(|_| Arc::new(RecordingTransport::default())).collect();

    let clients: Vec<LangfuseClient> = transports
        .iter()
        .map(|transport| {
            let mut config = config(100);
            config.disable_at_exit_hook = false;
            LangfuseClient::from_parts(ClientParts {
                config,
                registry: RuntimeRegistry::new(),
                transport: transport.clone(),
                failed_event_store: Arc::new(MemoryFailedEventStore::default()),
                exit_hooks: Some(hooks.clone()),
            })
            .unwrap()
        })
        .collect();

    for (i, client) in clients.iter().enumerate() {
        client.enqueue(event(&format!("c{i}"))).await.unwrap();
    }
    hooks.install().finish().await;

    assert_eq!(transports[0].delivered(), vec!["c0"]);
    assert_eq!(transports[1].delivered(), vec!["c1"]);
    assert!(clients.iter().all(LangfuseClient::is_shut_down));
}

#[tokio::test]
#[serial]
async fn test_unknown_backend_fails_before_any_request() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", INGESTION_PATH)
        .expect(0)
        .create_async()
        .await;

    env::set_var("LANGFUSE_PUBLIC_KEY", "pk-lf-test");
    env::set_var("LANGFUSE_SECRET_KEY", "sk-lf-test");
    env::set_var("LANGFUSE_HOST", server.url());
    env::set_var("LANGFUSE_JOB_BACKEND", "rabbitmq");

    let result = Config::from_env();

    env::remove_var("LANGFUSE_PUBLIC_KEY");
    env::remove_var("LANGFUSE_SECRET_KEY");
    env::remove_var("LANGFUSE_HOST");
    env::remove_var("LANGFUSE_JOB_BACKEND");

    match result {
        Err(err @ Error::UnknownBackend(_)) => {
            assert!(err.is_config());
            assert_eq!(err.to_string(), "Unknown job backend: rabbitmq");
        }
        other => panic!("expected unknown backend error, got {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
#[serial]
async fn test_missing_credentials_fail_before_any_request() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", INGESTION_PATH)
        .expect(0)
        .create_async()
        .await;

    env::remove_var("LANGFUSE_PUBLIC_KEY");
    env::remove_var("LANGFUSE_SECRET_KEY");
    env::set_var("LANGFUSE_HOST", server.url());

    let config = Config::from_env().unwrap();
    env::remove_var("LANGFUSE_HOST");

    let err = LangfuseClient::new(config, RuntimeRegistry::new()).unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("public_key is required"));
    mock.assert_async().await;
}
