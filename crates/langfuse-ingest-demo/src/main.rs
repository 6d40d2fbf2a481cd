// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use langfuse_ingest::{
    context,
    exit_hook::ExitHooks,
    failure_store::{FailedEventStore, MemoryFailedEventStore},
    logger::Formatter,
    models::{
        GenerationAttributes, ModelFields, ObservationFields, ScoreAttributes, ScoreDataType,
        ScoreValue, ToolAttributes, TraceAttributes, Usage,
    },
    runtime::{FrameworkJobRuntime, JobQueueConfig, JobQueueHandle, JobQueueService},
    transport::{HttpTransport, Transport},
    ClientParts, Config, Error, JobBackend, LangfuseClient, RuntimeRegistry,
};

/// Background runtimes started for the configured backend.
enum Runtimes {
    None,
    Generic {
        handle: JobQueueHandle,
        service: JoinHandle<()>,
    },
    Framework(Arc<FrameworkJobRuntime>),
}

impl Runtimes {
    fn start(
        config: &Config,
        registry: &mut RuntimeRegistry,
        transport: Arc<dyn Transport>,
        store: Arc<dyn FailedEventStore>,
    ) -> Result<Self, Error> {
        match config.job_backend {
            Some(JobBackend::Generic) => {
                let (service, handle) = JobQueueService::new(
                    JobQueueConfig {
                        queue_name: config.queue_name.clone(),
                        ..JobQueueConfig::default()
                    },
                    transport,
                    store,
                );
                let service = tokio::spawn(service.run());
                registry.register_generic(Arc::new(handle.clone()));
                Ok(Runtimes::Generic { handle, service })
            }
            Some(JobBackend::Framework) => {
                let runtime = Arc::new(FrameworkJobRuntime::new(
                    config.queue_name.clone(),
                    transport,
                    store,
                )?);
                registry.register_framework(runtime.clone());
                Ok(Runtimes::Framework(runtime))
            }
            Some(JobBackend::Synchronous) | None => Ok(Runtimes::None),
        }
    }

    async fn stop(self) {
        match self {
            Runtimes::None => {}
            Runtimes::Generic { handle, service } => {
                if let Err(e) = handle.shutdown() {
                    error!("Failed to stop job queue: {e}");
                }
                if let Err(e) = service.await {
                    error!("Job queue terminated abnormally: {e}");
                }
            }
            Runtimes::Framework(runtime) => {
                runtime.shutdown();
                runtime.wait().await;
            }
        }
    }
}

#[tokio::main]
pub async fn main() {
    let config = Config::from_env();
    let filter = env_filter(config.as_ref().ok());

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(filter).expect("could not parse log level in configuration"),
        )
        .event_format(Formatter)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match config.and_then(|config| config.validate().map(|()| config)) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return;
        }
    };

    let exit_guard = ExitHooks::global().install();

    if let Err(e) = run(config).await {
        error!("Demo failed: {e}");
    }

    exit_guard.finish().await;
}

/// Subscriber directives at the configured log level, `info` when the
/// configuration could not be read.
fn env_filter(config: Option<&Config>) -> String {
    let log_level = config.map_or_else(|| "info".to_string(), |c| c.log_level.to_lowercase());
    format!("h2=off,hyper=off,rustls=off,{log_level}")
}

async fn run(config: Config) -> Result<(), Error> {
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config)?);
    let store: Arc<dyn FailedEventStore> = Arc::new(MemoryFailedEventStore::default());

    let mut registry = RuntimeRegistry::new();
    let runtimes = Runtimes::start(&config, &mut registry, transport.clone(), store.clone())?;

    let client = LangfuseClient::from_parts(ClientParts {
        config,
        registry,
        transport,
        failed_event_store: store.clone(),
        exit_hooks: None,
    })?;
    info!("Recording conversation in {} mode", client.mode());

    let recorded = record_conversation(&client).await;
    let shutdown = client.shutdown().await;
    runtimes.stop().await;

    recorded?;
    shutdown?;

    let failed = store.list().await;
    if failed.is_empty() {
        info!("All events accepted");
    } else {
        for entry in &failed {
            error!("Event rejected by Langfuse: {}", entry.error);
        }
    }
    Ok(())
}

/// A user asks for the weather, the model calls a tool, then answers.
async fn record_conversation(client: &LangfuseClient) -> Result<(), Error> {
    let question = "What is the weather like in Paris today?";
    let trace = client
        .trace(TraceAttributes {
            name: Some("weather-assistant".to_string()),
            user_id: Some("demo-user".to_string()),
            session_id: Some("demo-session".to_string()),
            input: Some(json!({ "question": question })),
            tags: Some(vec!["demo".to_string(), "tool-calling".to_string()]),
            ..Default::default()
        })
        .await?;

    context::with_trace(trace.id.clone(), async {
        let mut planning = client
            .generation(GenerationAttributes {
                fields: ObservationFields {
                    name: Some("plan".to_string()),
                    input: Some(json!({
                        "messages": [{ "role": "user", "content": question }],
                        "tools": [{
                            "name": "get_weather",
                            "description": "Current weather for a city",
                            "parameters": {
                                "type": "object",
                                "properties": { "city": { "type": "string" } },
                                "required": ["city"]
                            }
                        }]
                    })),
                    ..Default::default()
                },
                model: ModelFields {
                    model: Some("gpt-4o".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await?;

        planning.fields.output = Some(json!({
            "role": "assistant",
            "tool_calls": [{
                "id": "call_weather_1",
                "function": { "name": "get_weather", "arguments": "{\"city\":\"Paris\"}" }
            }]
        }));
        planning.end_time = Some(Utc::now());
        planning.model.usage = Some(Usage {
            input: Some(48),
            output: Some(17),
            total: Some(65),
            unit: Some("TOKENS".to_string()),
            ..Default::default()
        });
        client.update_generation(planning).await?;

        let mut tool = client
            .tool(ToolAttributes {
                tool_name: Some("get_weather".to_string()),
                tool_call_id: Some("call_weather_1".to_string()),
                arguments: Some(json!({ "city": "Paris" })),
                fields: ObservationFields {
                    name: Some("get_weather".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await?;
        tool.fields.output = Some(json!({ "temperature_c": 18, "conditions": "partly cloudy" }));
        tool.end_time = Some(Utc::now());
        client.update_tool(tool).await?;

        let answer = "It is 18°C and partly cloudy in Paris.";
        client
            .generation(GenerationAttributes {
                fields: ObservationFields {
                    name: Some("answer".to_string()),
                    input: Some(json!({
                        "messages": [
                            { "role": "user", "content": question },
                            { "role": "tool", "tool_call_id": "call_weather_1",
                              "content": "{\"temperature_c\":18,\"conditions\":\"partly cloudy\"}" }
                        ]
                    })),
                    output: Some(json!({ "role": "assistant", "content": answer })),
                    ..Default::default()
                },
                model: ModelFields {
                    model: Some("gpt-4o".to_string()),
                    ..Default::default()
                },
                end_time: Some(Utc::now()),
                ..Default::default()
            })
            .await?;

        client
            .score(ScoreAttributes {
                name: "helpfulness".to_string(),
                value: ScoreValue::Numeric(0.9),
                data_type: Some(ScoreDataType::Numeric),
                comment: Some("Answered with live tool data".to_string()),
                ..Default::default()
            })
            .await?;

        Ok::<(), Error>(())
    })
    .await
}
