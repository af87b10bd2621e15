//! Entity watcher - turns media player state reads into pushed snapshots
//!
//! Polls the entity and publishes `SnapshotPushed` only when the snapshot
//! differs from the last one published. Too many failed reads in a row end
//! the run so the lifecycle handle can back off and restart it.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::adapters::traits::{AdapterContext, AdapterLogic, RemoteControl};
use crate::bus::{CardEvent, PlaybackSnapshot};

/// Failed reads in a row before the run is abandoned
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

pub struct EntityWatcher {
    remote: Arc<dyn RemoteControl>,
    poll_interval: Duration,
    last: Mutex<Option<PlaybackSnapshot>>,
}

impl EntityWatcher {
    pub fn new(remote: Arc<dyn RemoteControl>, poll_interval: Duration) -> Self {
        Self {
            remote,
            poll_interval,
            last: Mutex::new(None),
        }
    }

    /// Read once; publish if changed. Returns whether a snapshot was published.
    pub async fn poll_once(&self, ctx: &AdapterContext) -> Result<bool> {
        let snapshot = self
            .remote
            .fetch_snapshot()
            .await
            .map_err(|e| anyhow!("entity read failed: {}", e))?;

        {
            let mut last = self.last.lock().await;
            if last.as_ref() == Some(&snapshot) {
                return Ok(false);
            }
            *last = Some(snapshot.clone());
        }

        debug!(
            state = %snapshot.state,
            track = ?snapshot.track_uri,
            "Entity changed"
        );
        ctx.bus.publish(CardEvent::SnapshotPushed { snapshot });
        Ok(true)
    }
}

#[async_trait]
impl AdapterLogic for EntityWatcher {
    fn prefix(&self) -> &'static str {
        "entity"
    }

    async fn run(&self, ctx: AdapterContext) -> Result<()> {
        info!("Watching entity every {:?}", self.poll_interval);
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => {
                    info!("Entity watcher shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.poll_once(&ctx).await {
                        Ok(_) => consecutive_failures = 0,
                        Err(e) => {
                            consecutive_failures += 1;
                            warn!("{} ({}/{})", e, consecutive_failures, MAX_CONSECUTIVE_FAILURES);
                            if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                                return Err(e);
                            }
                        }
                    }
                }
            }
        }
    }
}
