// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shutdown callbacks run when the process terminates normally.
//!
//! Clients register a callback here instead of being looked up through a
//! global. The embedding binary installs the registry once, near the top of
//! `main`, and the returned [`ExitGuard`] runs every callback when it is
//! finished or dropped.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, error};

type Hook = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

static GLOBAL: OnceLock<ExitHooks> = OnceLock::new();

#[derive(Clone, Default)]
pub struct ExitHooks {
    hooks: Arc<Mutex<Vec<(String, Hook)>>>,
}

impl std::fmt::Debug for ExitHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitHooks")
            .field("registered", &self.len())
            .finish()
    }
}

impl ExitHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by clients that do not get one injected.
    pub fn global() -> &'static ExitHooks {
        GLOBAL.get_or_init(ExitHooks::new)
    }

    pub fn register<F, Fut>(&self, name: impl Into<String>, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: Hook = Box::new(move || Box::pin(callback()));
        #[allow(clippy::expect_used)]
        let mut hooks = self.hooks.lock().expect("lock poisoned");
        hooks.push((name.into(), hook));
    }

    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let hooks = self.hooks.lock().expect("lock poisoned");
        hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every registered callback once, in registration order.
    pub async fn run(&self) {
        let hooks = {
            #[allow(clippy::expect_used)]
            let mut hooks = self.hooks.lock().expect("lock poisoned");
            std::mem::take(&mut *hooks)
        };
        for (name, hook) in hooks {
            debug!("Running exit hook {name}");
            hook().await;
        }
    }

    pub fn install(&self) -> ExitGuard {
        ExitGuard {
            hooks: Some(self.clone()),
        }
    }
}

/// Runs the registered callbacks when finished or dropped.
#[must_use = "dropping the guard immediately runs the exit hooks"]
pub struct ExitGuard {
    hooks: Option<ExitHooks>,
}

impl ExitGuard {
    /// Runs the callbacks on the current runtime.
    pub async fn finish(mut self) {
        if let Some(hooks) = self.hooks.take() {
            hooks.run().await;
        }
    }
}

impl Drop for ExitGuard {
    // The caller's runtime may be shutting down, so the callbacks get a
    // dedicated thread with its own runtime.
    fn drop(&mut self) {
        let Some(hooks) = self.hooks.take() else {
            return;
        };
        if hooks.is_empty() {
            return;
        }

        let spawned = std::thread::Builder::new()
            .name("langfuse-exit-hooks".to_string())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(hooks.run()),
                    Err(e) => error!("Failed to build runtime for exit hooks: {e}"),
                }
            });

        match spawned {
            Ok(handle) => {
                if handle.join().is_err() {
                    error!("Exit hook thread panicked");
                }
            }
            Err(e) => error!("Failed to spawn exit hook thread: {e}"),
        }
    }
}
