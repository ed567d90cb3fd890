//! Run lifecycle
//!
//! [`LifecycleController`] owns the `idle | running | error` state machine
//! that ties a build to its execution in the sandbox. Every state flip that
//! guards a run happens before the first `.await`, so a concurrent `run`
//! always observes `running` and is rejected rather than queued.
//!
//! Each run carries an epoch. A stop (or a newer run) bumps the epoch, and a
//! run that finishes under a stale epoch leaves the state untouched.

use crate::bus::SubscriptionId;
use crate::host::{BuildStatus, HostBridge, HostMessageHandler, HostState, LogEntry};
use crate::sandbox::{SandboxError, SandboxManager};
use ember_build::{describe_panic, IncrementalBuilder};
use ember_config::SandboxSettings;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("A run is already in progress")]
    AlreadyRunning,

    #[error("Build failed: {0}")]
    Build(String),

    #[error("Build produced an empty bundle")]
    EmptyBundle,

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("Build panicked: {0}")]
    Panicked(String),

    #[error("Run was stopped before it finished")]
    Superseded,
}

pub struct LifecycleController {
    builder: Arc<tokio::sync::Mutex<Box<dyn IncrementalBuilder>>>,
    sandbox: Arc<SandboxManager>,
    bridge: Option<Arc<dyn HostBridge>>,
    state: Arc<Mutex<HostState>>,
    settle: Duration,
    subscription: SubscriptionId,
}

impl LifecycleController {
    /// Wire a builder and a sandbox together
    ///
    /// Installs the host message mapping on the sandbox's bus.
    pub fn new(
        builder: impl IncrementalBuilder + 'static,
        sandbox: Arc<SandboxManager>,
        settings: &SandboxSettings,
    ) -> Self {
        let builder: Box<dyn IncrementalBuilder> = Box::new(builder);
        let state = Arc::new(Mutex::new(HostState::default()));
        let subscription = sandbox
            .bus()
            .subscribe(HostMessageHandler::new(Arc::clone(&state)));

        Self {
            builder: Arc::new(tokio::sync::Mutex::new(builder)),
            sandbox,
            bridge: None,
            state,
            settle: settings.settle,
            subscription,
        }
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn HostBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn sandbox(&self) -> &Arc<SandboxManager> {
        &self.sandbox
    }

    pub fn status(&self) -> BuildStatus {
        self.lock_state().status
    }

    pub fn error(&self) -> Option<String> {
        self.lock_state().error.clone()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.lock_state().logs.clone()
    }

    pub fn clear_logs(&self) {
        self.lock_state().logs.clear();
    }

    /// Build `entry` and execute the bundle
    pub async fn run(&self, entry: &str) -> Result<(), LifecycleError> {
        let epoch = self.begin()?;
        info!(entry, epoch, "run started");
        self.build_and_execute(epoch, entry).await
    }

    /// Recreate the sandbox, then build and execute `entry`
    pub async fn restart(&self, entry: &str) -> Result<(), LifecycleError> {
        let epoch = self.begin()?;
        info!(entry, epoch, "restart started");

        if let Some(bridge) = &self.bridge {
            bridge.destroy();
        }
        if let Err(e) = self.sandbox.reset().await {
            return self.fail(epoch, e.into());
        }
        tokio::time::sleep(self.settle).await;

        self.build_and_execute(epoch, entry).await
    }

    /// Return to idle and tear the sandbox down; no-op when already idle
    pub async fn stop(&self) {
        {
            let mut state = self.lock_state();
            if state.status == BuildStatus::Idle {
                return;
            }
            state.status = BuildStatus::Idle;
            state.error = None;
            state.logs.clear();
            state.epoch += 1;
        }
        info!("run stopped");

        self.sandbox.destroy().await;
        if let Some(bridge) = &self.bridge {
            bridge.destroy();
        }
    }

    fn begin(&self) -> Result<u64, LifecycleError> {
        let mut state = self.lock_state();
        if state.status == BuildStatus::Running {
            return Err(LifecycleError::AlreadyRunning);
        }
        Ok(state.begin())
    }

    async fn build_and_execute(&self, epoch: u64, entry: &str) -> Result<(), LifecycleError> {
        let builder = Arc::clone(&self.builder);
        let attempt = AssertUnwindSafe(async move {
            builder.lock().await.run_incremental_build(entry).await
        })
        .catch_unwind()
        .await;

        let result = match attempt {
            Ok(result) => result,
            Err(panic) => {
                return self.fail(epoch, LifecycleError::Panicked(describe_panic(panic.as_ref())))
            }
        };
        if !self.is_current(epoch) {
            debug!(epoch, "build finished after the run was superseded");
            return Err(LifecycleError::Superseded);
        }

        if !result.success {
            let message = result
                .error_message
                .unwrap_or_else(|| "unknown build error".to_string());
            return self.fail(epoch, LifecycleError::Build(message));
        }
        let Some(bundle) = result.runnable_bundle() else {
            return self.fail(epoch, LifecycleError::EmptyBundle);
        };

        if let Err(e) = self.sandbox.execute(bundle).await {
            return self.fail(epoch, e.into());
        }

        let mut state = self.lock_state();
        if state.epoch != epoch {
            return Err(LifecycleError::Superseded);
        }
        state.status = if state.error.is_some() {
            BuildStatus::Error
        } else {
            BuildStatus::Idle
        };
        info!(epoch, strategy = %result.strategy_used, status = %state.status, "run finished");
        Ok(())
    }

    fn fail(&self, epoch: u64, error: LifecycleError) -> Result<(), LifecycleError> {
        let mut state = self.lock_state();
        if state.epoch != epoch {
            return Err(LifecycleError::Superseded);
        }
        warn!(epoch, error = %error, "run failed");
        state.status = BuildStatus::Error;
        state.error = Some(error.to_string());
        Err(error)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lock_state().epoch == epoch
    }

    fn lock_state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        self.sandbox.bus().unsubscribe(self.subscription);
    }
}
