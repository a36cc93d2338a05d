use std::sync::Arc;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use scout_core::config::SchedulerConfig;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    engine::SchedulingEngine,
    error::{Result, SchedulerError},
};

/// Loop pacing and the failure ceilings of [`SchedulerManager::start`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub poll_interval: Duration,
    /// Consecutive failed ticks before the delay grows exponentially.
    pub backoff_after_failures: u32,
    pub max_backoff: Duration,
    /// Consecutive failed ticks that stop the loop with `SystemicFailure`.
    pub max_consecutive_failures: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for ManagerConfig {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval(),
            backoff_after_failures: cfg.backoff_after_failures,
            max_backoff: cfg.max_backoff(),
            max_consecutive_failures: cfg.max_consecutive_failures,
        }
    }
}

/// Cloneable trigger for the manager's shutdown signal.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Owns the polling loop: one engine tick per iteration, a cancellable sleep
/// in between, and fail-fast when the store stays down.
pub struct SchedulerManager {
    engine: SchedulingEngine,
    config: ManagerConfig,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SchedulerManager {
    pub fn new(engine: SchedulingEngine, config: ManagerConfig) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            engine,
            config,
            shutdown_tx: Arc::new(tx),
            shutdown_rx: rx,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Request shutdown. A sleeping loop wakes at once; a running tick stops
    /// taking new executions and returns after in-flight attempts finish.
    pub fn stop(&self) {
        info!("scheduler stop requested");
        self.shutdown_tx.send_replace(true);
    }

    /// Run until [`stop`](Self::stop) is called or the store keeps failing.
    ///
    /// A failed tick is logged and retried. From `backoff_after_failures`
    /// consecutive failures on, the delay doubles up to `max_backoff`; at
    /// `max_consecutive_failures` the loop gives up with
    /// [`SchedulerError::SystemicFailure`].
    pub async fn start(&self) -> Result<()> {
        let mut shutdown = self.shutdown_rx.clone();
        let mut backoff = self.new_backoff();
        let mut consecutive_failures: u32 = 0;
        let mut ticks: u64 = 0;

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_retries = self.engine.config().max_retries,
            cooldown_secs = self.engine.config().cooldown.as_secs(),
            "scheduler started"
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            ticks += 1;
            let delay = match self.engine.tick(&shutdown).await {
                Ok(report) => {
                    if consecutive_failures > 0 {
                        info!(after = consecutive_failures, "scheduler recovered");
                        backoff.reset();
                    }
                    consecutive_failures = 0;
                    debug!(tick = ticks, eligible = report.eligible, "tick done");
                    self.config.poll_interval
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(
                        consecutive = consecutive_failures,
                        "scheduler tick failed: {e}"
                    );
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        error!(
                            consecutive = consecutive_failures,
                            "too many consecutive failures, stopping scheduler"
                        );
                        return Err(SchedulerError::SystemicFailure {
                            consecutive: consecutive_failures,
                            last_error: e.to_string(),
                        });
                    }
                    self.failure_delay(consecutive_failures, &mut backoff)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!(ticks, "scheduler stopped");
        Ok(())
    }

    fn new_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.poll_interval,
            current_interval: self.config.poll_interval,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.config.max_backoff,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    fn failure_delay(
        &self,
        consecutive_failures: u32,
        backoff: &mut ExponentialBackoff,
    ) -> Duration {
        if consecutive_failures < self.config.backoff_after_failures {
            return self.config.poll_interval;
        }
        let delay = backoff.next_backoff().unwrap_or(self.config.max_backoff);
        warn!(
            retry_in_ms = delay.as_millis() as u64,
            "backing off after repeated failures"
        );
        delay
    }
}

/// Resolve once SIGINT (Ctrl+C) or, on Unix, SIGTERM arrives.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

/// Trigger `handle` when the process receives an interrupt or terminate signal.
pub fn shutdown_on_signal(handle: ShutdownHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        handle.shutdown();
    })
}
