//! Event bus between the card core and the presentation layer
//!
//! Uses tokio::sync::broadcast for pub/sub. Subscribing is how a view
//! registers for render callbacks.

mod events;

pub use events::*;

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Event bus handle for publishing and subscribing
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CardEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: CardEvent) {
        let kind = event.event_type();
        if self.sender.send(event).is_err() {
            trace!("No subscribers for {}", kind);
        }
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<CardEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    /// Default capacity of 256 events
    fn default() -> Self {
        Self::new(256)
    }
}

/// Shared event bus wrapped in Arc for thread-safe sharing
pub type SharedBus = Arc<EventBus>;

/// Create a new shared event bus
pub fn create_bus() -> SharedBus {
    Arc::new(EventBus::default())
}
