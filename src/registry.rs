//! Card instance registry
//!
//! The same card can be mounted more than once (an editor preview next to
//! the live dashboard). Only the active instance shows popups; the hosting
//! shell owns the registry and hands it to each coordinator.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

pub type InstanceId = u64;

#[derive(Debug, Default)]
pub struct InstanceRegistry {
    next_id: AtomicU64,
    active: RwLock<Option<InstanceId>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id; the first instance registered becomes active
    pub async fn register(&self) -> InstanceId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut active = self.active.write().await;
        if active.is_none() {
            *active = Some(id);
        }
        debug!("Registered card instance {} (active: {:?})", id, *active);
        id
    }

    /// Make `id` the instance that shows popups
    pub async fn activate(&self, id: InstanceId) {
        *self.active.write().await = Some(id);
        debug!("Card instance {} is now active", id);
    }

    pub async fn is_active(&self, id: InstanceId) -> bool {
        *self.active.read().await == Some(id)
    }

    pub async fn active(&self) -> Option<InstanceId> {
        *self.active.read().await
    }

    /// Forget `id`; if it was active, no instance is
    pub async fn release(&self, id: InstanceId) {
        let mut active = self.active.write().await;
        if *active == Some(id) {
            *active = None;
        }
    }
}
