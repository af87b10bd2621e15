//! AdapterHandle - keeps a long-running adapter alive
//!
//! The entity watcher is the only inbound source of snapshots; if it dies the
//! card freezes on stale state. The handle restarts it with exponential
//! backoff and publishes `AdapterStopped` once it is really gone.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::traits::{AdapterContext, AdapterLogic};
use crate::bus::{CardEvent, SharedBus};

/// Backoff settings for restarting an adapter
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    /// Backoff caps at this value
    pub max_delay: Duration,
    /// A run at least this long resets the backoff to `initial_delay`
    pub stable_run_threshold: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            stable_run_threshold: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            ..Self::default()
        }
    }

    fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_delay)
    }
}

pub struct AdapterHandle<T: AdapterLogic> {
    logic: Arc<T>,
    bus: SharedBus,
    shutdown: CancellationToken,
}

impl<T: AdapterLogic> AdapterHandle<T> {
    pub fn new(logic: T, bus: SharedBus, shutdown: CancellationToken) -> Self {
        Self {
            logic: Arc::new(logic),
            bus,
            shutdown,
        }
    }

    /// Run until a clean exit or cancellation, restarting on error.
    pub async fn run_with_retry(self, config: RetryConfig) -> Result<()> {
        let name = self.logic.prefix();
        let mut delay = config.initial_delay;

        while !self.shutdown.is_cancelled() {
            let started = Instant::now();
            match self.run_once().await {
                Ok(()) => {
                    info!("{}: exited cleanly", name);
                    break;
                }
                Err(e) => {
                    if started.elapsed() >= config.stable_run_threshold {
                        delay = config.initial_delay;
                    }
                    warn!("{}: {} (restarting in {:?})", name, e, delay);

                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {
                            delay = config.next_delay(delay);
                        }
                    }
                }
            }
        }

        self.bus.publish(CardEvent::AdapterStopped {
            adapter: name.to_string(),
        });
        info!("{}: stopped", name);
        Ok(())
    }

    async fn run_once(&self) -> Result<()> {
        self.logic.init().await?;

        let ctx = AdapterContext {
            bus: self.bus.clone(),
            shutdown: self.shutdown.clone(),
        };

        tokio::select! {
            result = self.logic.run(ctx) => result,
            _ = self.shutdown.cancelled() => Ok(()),
        }
    }
}
