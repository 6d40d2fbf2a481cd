// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::error::Error;
use crate::event::Batch;
use crate::failure_store::FailedEventStore;
use crate::runtime::JobRuntime;
use crate::transport::Transport;
use crate::worker::{self, DeliveryOutcome, JobError};

/// Execution path for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobBackend {
    /// Deliver inline; the caller waits for the transport.
    Synchronous,
    /// Hand off to the generic job queue.
    Generic,
    /// Hand off to the framework-integrated job runtime.
    Framework,
}

impl FromStr for JobBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "synchronous" | "sync" => Ok(JobBackend::Synchronous),
            "generic" | "sidekiq" => Ok(JobBackend::Generic),
            "framework" | "active_job" | "activejob" => Ok(JobBackend::Framework),
            _ => Err(Error::UnknownBackend(s.to_string())),
        }
    }
}

impl fmt::Display for JobBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobBackend::Synchronous => "synchronous",
            JobBackend::Generic => "generic",
            JobBackend::Framework => "framework",
        };
        f.write_str(name)
    }
}

/// Background runtimes available in this process. Each runtime registers
/// itself at startup; the router never looks for anything else.
#[derive(Clone, Default)]
pub struct RuntimeRegistry {
    generic: Option<Arc<dyn JobRuntime>>,
    framework: Option<Arc<dyn JobRuntime>>,
}

impl fmt::Debug for RuntimeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeRegistry")
            .field("generic", &self.generic.as_ref().map(|r| r.queue_name().to_string()))
            .field(
                "framework",
                &self.framework.as_ref().map(|r| r.queue_name().to_string()),
            )
            .finish()
    }
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_generic(&mut self, runtime: Arc<dyn JobRuntime>) -> &mut Self {
        self.generic = Some(runtime);
        self
    }

    pub fn register_framework(&mut self, runtime: Arc<dyn JobRuntime>) -> &mut Self {
        self.framework = Some(runtime);
        self
    }

    pub fn generic(&self) -> Option<&Arc<dyn JobRuntime>> {
        self.generic.as_ref()
    }

    pub fn framework(&self) -> Option<&Arc<dyn JobRuntime>> {
        self.framework.as_ref()
    }

    pub fn get(&self, backend: JobBackend) -> Option<&Arc<dyn JobRuntime>> {
        match backend {
            JobBackend::Synchronous => None,
            JobBackend::Generic => self.generic(),
            JobBackend::Framework => self.framework(),
        }
    }

    /// Framework first, then generic, then synchronous.
    pub fn detect(&self) -> JobBackend {
        if self.framework.is_some() {
            JobBackend::Framework
        } else if self.generic.is_some() {
            JobBackend::Generic
        } else {
            JobBackend::Synchronous
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Dispatched {
    /// Nothing to send.
    Skipped,
    /// Delivered inline.
    Delivered(DeliveryOutcome),
    /// Accepted by a background runtime.
    Enqueued { runtime: &'static str },
}

pub struct DispatchRouter {
    mode: JobBackend,
    runtime: Option<Arc<dyn JobRuntime>>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn FailedEventStore>,
}

impl fmt::Debug for DispatchRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRouter")
            .field("mode", &self.mode)
            .field("runtime", &self.runtime.as_ref().map(|r| r.name()))
            .finish()
    }
}

impl DispatchRouter {
    /// Resolves the execution mode. A background mode whose runtime was not
    /// registered fails here, before any batch is sent.
    pub fn new(
        backend: Option<JobBackend>,
        registry: &RuntimeRegistry,
        transport: Arc<dyn Transport>,
        store: Arc<dyn FailedEventStore>,
    ) -> Result<Self, Error> {
        let mode = backend.unwrap_or_else(|| registry.detect());
        let runtime = match mode {
            JobBackend::Synchronous => None,
            background => Some(
                registry
                    .get(background)
                    .cloned()
                    .ok_or(Error::RuntimeUnavailable(background))?,
            ),
        };
        debug!("Dispatching batches in {mode} mode");
        Ok(DispatchRouter {
            mode,
            runtime,
            transport,
            store,
        })
    }

    pub fn mode(&self) -> JobBackend {
        self.mode
    }

    pub async fn dispatch(&self, batch: Batch) -> Result<Dispatched, Error> {
        if batch.is_empty() {
            return Ok(Dispatched::Skipped);
        }

        match &self.runtime {
            None => {
                let outcome = worker::perform(&batch, self.transport.as_ref(), self.store.as_ref())
                    .await
                    .map_err(|err| match err {
                        JobError::Retryable(err) => Error::Transport(err),
                        other => Error::Job(other),
                    })?;
                Ok(Dispatched::Delivered(outcome))
            }
            Some(runtime) => {
                debug!(
                    "Enqueuing {} events on the {} runtime (queue {})",
                    batch.len(),
                    runtime.name(),
                    runtime.queue_name()
                );
                runtime.submit(batch)?;
                Ok(Dispatched::Enqueued {
                    runtime: runtime.name(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, IngestionEvent};
    use crate::failure_store::MemoryFailedEventStore;
    use crate::models::{Trace, TraceAttributes};
    use crate::transport::TransportError;
    use crate::worker::tests::ScriptedTransport;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRuntime {
        name: &'static str,
        submitted: Mutex<Vec<Vec<String>>>,
    }

    impl JobRuntime for RecordingRuntime {
        fn name(&self) -> &'static str {
            self.name
        }

        fn queue_name(&self) -> &str {
            "langfuse"
        }

        fn submit(&self, batch: Batch) -> Result<(), Error> {
            let ids = batch.ids().into_iter().map(String::from).collect();
            self.submitted.lock().unwrap().push(ids);
            Ok(())
        }
    }

    fn runtime(name: &'static str) -> Arc<RecordingRuntime> {
        Arc::new(RecordingRuntime {
            name,
            ..Default::default()
        })
    }

    fn batch(ids: &[&str]) -> Batch {
        Batch::new(
            ids.iter()
                .map(|id| {
                    IngestionEvent::with_id(
                        *id,
                        EventType::TraceCreate,
                        Trace::new(TraceAttributes::default()),
                    )
                })
                .collect(),
        )
    }

    fn router(
        backend: Option<JobBackend>,
        registry: &RuntimeRegistry,
        transport: Arc<ScriptedTransport>,
    ) -> Result<DispatchRouter, Error> {
        DispatchRouter::new(
            backend,
            registry,
            transport,
            Arc::new(MemoryFailedEventStore::default()),
        )
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("synchronous".parse::<JobBackend>().unwrap(), JobBackend::Synchronous);
        assert_eq!("sync".parse::<JobBackend>().unwrap(), JobBackend::Synchronous);
        assert_eq!("generic".parse::<JobBackend>().unwrap(), JobBackend::Generic);
        assert_eq!("sidekiq".parse::<JobBackend>().unwrap(), JobBackend::Generic);
        assert_eq!("Framework".parse::<JobBackend>().unwrap(), JobBackend::Framework);
        assert_eq!("active_job".parse::<JobBackend>().unwrap(), JobBackend::Framework);

        let err = "rabbitmq".parse::<JobBackend>().unwrap_err();
        assert!(err.is_config());
        assert_eq!(err.to_string(), "Unknown job backend: rabbitmq");
    }

    #[test]
    fn test_auto_detect_prefers_framework() {
        let mut registry = RuntimeRegistry::new();
        assert_eq!(registry.detect(), JobBackend::Synchronous);

        registry.register_generic(runtime("generic"));
        assert_eq!(registry.detect(), JobBackend::Generic);

        registry.register_framework(runtime("framework"));
        assert_eq!(registry.detect(), JobBackend::Framework);
    }

    #[test]
    fn test_unregistered_background_mode_is_config_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let err = router(
            Some(JobBackend::Generic),
            &RuntimeRegistry::new(),
            transport.clone(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::RuntimeUnavailable(JobBackend::Generic)));
        assert!(err.is_config());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_is_skipped() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let router = router(None, &RuntimeRegistry::new(), transport.clone()).unwrap();

        let dispatched = router.dispatch(Batch::default()).await.unwrap();

        assert_eq!(dispatched, Dispatched::Skipped);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_synchronous_delivers_inline() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let router = router(None, &RuntimeRegistry::new(), transport.clone()).unwrap();
        assert_eq!(router.mode(), JobBackend::Synchronous);

        let dispatched = router.dispatch(batch(&["e1", "e2"])).await.unwrap();

        assert_eq!(
            dispatched,
            Dispatched::Delivered(DeliveryOutcome::Accepted { events: 2 })
        );
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_synchronous_propagates_errors() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Api {
                status: 500,
                message: "Internal Server Error".to_string(),
            }),
            Err(TransportError::Api {
                status: 401,
                message: "Unauthorized".to_string(),
            }),
        ]));
        let router = router(
            Some(JobBackend::Synchronous),
            &RuntimeRegistry::new(),
            transport.clone(),
        )
        .unwrap();

        let err = router.dispatch(batch(&["e1"])).await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Api { status: 500, .. })));

        let err = router.dispatch(batch(&["e2"])).await.unwrap_err();
        assert!(matches!(err, Error::Job(JobError::Discard(_))));
    }

    #[tokio::test]
    async fn test_background_enqueues_without_calling_transport() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let generic = runtime("generic");
        let framework = runtime("framework");
        let mut registry = RuntimeRegistry::new();
        registry
            .register_generic(generic.clone())
            .register_framework(framework.clone());

        let router = router(Some(JobBackend::Generic), &registry, transport.clone()).unwrap();
        let dispatched = router.dispatch(batch(&["e1", "e2"])).await.unwrap();

        assert_eq!(dispatched, Dispatched::Enqueued { runtime: "generic" });
        assert_eq!(
            *generic.submitted.lock().unwrap(),
            vec![vec!["e1".to_string(), "e2".to_string()]]
        );
        assert!(framework.submitted.lock().unwrap().is_empty());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }
}
