//! Graceful shutdown for a coffer node.
//!
//! A termination signal flips the [`ShutdownCoordinator`]. Servers stop
//! accepting RPCs, then the [`ShutdownManager`] runs the registered
//! teardown steps (stepping the pool service down among them) newest
//! first, each under its own deadline.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Deadline of one teardown step.
const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Shutdown flag shared by every server task.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
    step_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::with_step_timeout(DEFAULT_STEP_TIMEOUT)
    }

    pub fn with_step_timeout(step_timeout: Duration) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
            step_timeout,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.rx.borrow()
    }

    /// Initiate shutdown. Later calls are no-ops.
    pub fn shutdown(&self) {
        if !self.tx.send_replace(true) {
            info!("Initiating graceful shutdown");
        }
    }

    /// Resolve once shutdown has been initiated.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in self, so this only fails if it was dropped
        let _ = rx.wait_for(|down| *down).await;
    }

    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for SIGTERM or SIGINT, then trigger shutdown.
#[cfg(unix)]
pub async fn shutdown_on_signal(coordinator: ShutdownCoordinator) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        _ => {
            error!("Failed to install signal handlers, shutting down");
            coordinator.shutdown();
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
        _ = coordinator.wait_for_shutdown() => return,
    }
    coordinator.shutdown();
}

#[cfg(not(unix))]
pub async fn shutdown_on_signal(coordinator: ShutdownCoordinator) {
    tokio::select! {
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => info!("Received Ctrl+C"),
            Err(e) => error!(error = %e, "Failed to install Ctrl+C handler"),
        },
        _ = coordinator.wait_for_shutdown() => return,
    }
    coordinator.shutdown();
}

type StepFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// One named teardown step.
pub struct TeardownStep {
    name: String,
    run: StepFuture,
}

impl TeardownStep {
    pub fn new<S, F>(name: S, run: F) -> Self
    where
        S: Into<String>,
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::pin(run),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Runs teardown steps once shutdown begins.
pub struct ShutdownManager {
    coordinator: ShutdownCoordinator,
    steps: Vec<TeardownStep>,
}

impl ShutdownManager {
    pub fn new(coordinator: ShutdownCoordinator) -> Self {
        Self {
            coordinator,
            steps: Vec::new(),
        }
    }

    pub fn register(&mut self, step: TeardownStep) {
        info!(step = %step.name(), "Registered teardown step");
        self.steps.push(step);
    }

    /// Wait for shutdown, then run steps newest first. A step that misses
    /// its deadline is abandoned and the next one starts.
    pub async fn run(mut self) {
        self.coordinator.wait_for_shutdown().await;

        let deadline = self.coordinator.step_timeout();
        let total = self.steps.len();
        let mut timed_out = 0usize;
        while let Some(step) = self.steps.pop() {
            info!(step = %step.name, "Running teardown step");
            if tokio::time::timeout(deadline, step.run).await.is_err() {
                warn!(step = %step.name, ?deadline, "Teardown step timed out");
                timed_out += 1;
            }
        }

        if timed_out == 0 {
            info!(total, "Teardown complete");
        } else {
            error!(total, timed_out, "Teardown finished with timeouts");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_shutdown_is_sticky() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_shutting_down());
        coordinator.shutdown();
        coordinator.shutdown();
        assert!(coordinator.is_shutting_down());

        let result =
            tokio::time::timeout(Duration::from_millis(100), coordinator.wait_for_shutdown()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_steps_run_newest_first() {
        let coordinator = ShutdownCoordinator::new();
        let mut manager = ShutdownManager::new(coordinator.clone());
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["store", "pool-service"] {
            let order = order.clone();
            manager.register(TeardownStep::new(name, async move {
                order.lock().push(name);
            }));
        }

        coordinator.shutdown();
        tokio::time::timeout(Duration::from_millis(100), manager.run())
            .await
            .unwrap();

        assert_eq!(*order.lock(), vec!["pool-service", "store"]);
    }

    #[tokio::test]
    async fn test_slow_step_does_not_block_the_rest() {
        let coordinator = ShutdownCoordinator::with_step_timeout(Duration::from_millis(20));
        let mut manager = ShutdownManager::new(coordinator.clone());
        let done = Arc::new(Mutex::new(false));

        let flag = done.clone();
        manager.register(TeardownStep::new("fast", async move {
            *flag.lock() = true;
        }));
        manager.register(TeardownStep::new("stuck", std::future::pending()));

        coordinator.shutdown();
        tokio::time::timeout(Duration::from_secs(1), manager.run())
            .await
            .unwrap();
        assert!(*done.lock());
    }
}
