use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::bus::{DeviceDescriptor, MediaType, PlaybackSnapshot, QueueSnapshot, SharedBus};

// =============================================================================
// Remote call results
// =============================================================================

/// Failure reported by the playback service or the entity store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    /// HTTP-style status code, when the transport reported one
    pub code: Option<u16>,
    pub message: String,
}

/// Message fragments that identify a wrong or sleeping target device
const DEVICE_ERROR_MARKERS: &[&str] = &[
    "no active spotify player",
    "default player device",
    "restriction violated",
];

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: u16, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Whether the failure is about device targeting rather than the request
    pub fn is_device_error(&self) -> bool {
        if self.code == Some(404) {
            return true;
        }
        let message = self.message.to_lowercase();
        DEVICE_ERROR_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
    }
}

/// Outcome of a remote command
pub type CallResult = Result<(), RemoteError>;

// =============================================================================
// RemoteControl - outbound calls
// =============================================================================

/// Commands and queries against the playback service.
///
/// Implementations catch every transport failure and return it as a
/// [`RemoteError`]; nothing here panics or propagates past the caller.
#[async_trait]
pub trait RemoteControl: Send + Sync + 'static {
    /// Play a context, optionally starting at a specific track
    async fn play_context(
        &self,
        context_uri: &str,
        device_id: Option<&str>,
        offset_uri: Option<&str>,
    ) -> CallResult;

    async fn play_tracks(&self, uris: &[String], device_id: Option<&str>) -> CallResult;

    /// Play the user's liked songs
    async fn play_favorites(&self, device_id: Option<&str>, shuffle: bool) -> CallResult;

    /// Generic platform play; cannot target a device
    async fn play_media(&self, uri: &str, media_type: MediaType) -> CallResult;

    async fn toggle_playback(&self, play: bool) -> CallResult;

    async fn skip_next(&self) -> CallResult;

    async fn skip_previous(&self) -> CallResult;

    async fn transfer_playback(&self, device_id: &str) -> CallResult;

    async fn set_favorite(&self, track_id: &str, value: bool) -> CallResult;

    async fn add_to_queue(&self, uri: &str) -> CallResult;

    /// Volume in [0, 1]
    async fn set_volume(&self, level: f32) -> CallResult;

    async fn list_devices(&self, refresh: bool) -> Result<Vec<DeviceDescriptor>, RemoteError>;

    async fn fetch_queue(&self) -> Result<QueueSnapshot, RemoteError>;

    async fn check_favorites(
        &self,
        track_ids: &[String],
    ) -> Result<HashMap<String, bool>, RemoteError>;

    /// Read the entity state once
    async fn fetch_snapshot(&self) -> Result<PlaybackSnapshot, RemoteError>;
}

// =============================================================================
// AdapterLogic - long-running inbound adapters
// =============================================================================

/// Context passed to adapter logic during execution
pub struct AdapterContext {
    /// Event bus for publishing events
    pub bus: SharedBus,
    /// Cancellation token for shutdown coordination
    pub shutdown: CancellationToken,
}

/// Adapter-specific logic trait
///
/// Implementors provide polling or subscription handling.
/// Lifecycle (startup, shutdown, retry) is handled by AdapterHandle.
#[async_trait]
pub trait AdapterLogic: Send + Sync + 'static {
    /// Adapter name for logs and AdapterStopped events
    fn prefix(&self) -> &'static str;

    /// Run the adapter's main loop.
    /// Should publish SnapshotPushed events to ctx.bus.
    /// Returns when ctx.shutdown is triggered or on error.
    async fn run(&self, ctx: AdapterContext) -> Result<()>;

    /// Optional: called before run() for one-time setup
    async fn init(&self) -> Result<()> {
        Ok(())
    }
}
