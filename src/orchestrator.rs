//! Playback orchestrator
//!
//! Turns a play request into the right remote call and recovers from the
//! usual device-targeting failure:
//!
//! ```text
//! resolve device -> attempt -> ok
//!                      └ device error -> discover -> match, active   -> retry
//!                                                 -> match, inactive -> transfer, wait, retry
//!                                                 -> no match        -> alert
//! ```
//!
//! Every path makes at most one retry.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::adapters::traits::{CallResult, RemoteControl, RemoteError};
use crate::bus::{CardEvent, MediaType};
use crate::reconciler::ActiveSession;

/// Message of the synthetic failure raised when there is nowhere to play
const NO_ACTIVE_PLAYER: &str = "no active Spotify player";

/// A user-initiated play action
#[derive(Debug, Clone, PartialEq)]
pub struct PlayRequest {
    pub uri: String,
    pub media_type: MediaType,
    /// Context the item was picked from, if any
    pub context_uri: Option<String>,
    /// Explicit target device (id or name)
    pub device: Option<String>,
}

impl PlayRequest {
    pub fn new(uri: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            uri: uri.into(),
            media_type,
            context_uri: None,
            device: None,
        }
    }

    pub fn in_context(mut self, context_uri: impl Into<String>) -> Self {
        self.context_uri = Some(context_uri.into());
        self
    }

    pub fn on_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }
}

/// The remote call a request maps to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayCall {
    Context {
        context_uri: String,
        device_id: Option<String>,
        offset_uri: Option<String>,
    },
    Tracks {
        uris: Vec<String>,
        device_id: Option<String>,
    },
    Favorites {
        device_id: Option<String>,
        shuffle: bool,
    },
    /// Platform play; cannot target a device
    Media { uri: String, media_type: MediaType },
}

impl PlayCall {
    pub fn plan(request: &PlayRequest, device: Option<&str>) -> Self {
        let device_id = device.map(str::to_string);

        if request.media_type.is_context() {
            return Self::Context {
                context_uri: request.uri.clone(),
                device_id,
                offset_uri: None,
            };
        }
        if request.media_type == MediaType::LikedSongs {
            return Self::Favorites {
                device_id,
                shuffle: true,
            };
        }

        // A track picked from inside a context starts the context at that track
        match request.context_uri.as_deref() {
            Some(context) if context != request.uri => Self::Context {
                context_uri: context.to_string(),
                device_id,
                offset_uri: Some(request.uri.clone()),
            },
            _ if device_id.is_some() => Self::Tracks {
                uris: vec![request.uri.clone()],
                device_id,
            },
            _ => Self::Media {
                uri: request.uri.clone(),
                media_type: request.media_type,
            },
        }
    }

    /// Same call aimed at a specific device
    pub fn on_device(&self, device_id: &str) -> Self {
        let device_id = Some(device_id.to_string());
        match self {
            Self::Context {
                context_uri,
                offset_uri,
                ..
            } => Self::Context {
                context_uri: context_uri.clone(),
                device_id,
                offset_uri: offset_uri.clone(),
            },
            Self::Tracks { uris, .. } => Self::Tracks {
                uris: uris.clone(),
                device_id,
            },
            Self::Favorites { shuffle, .. } => Self::Favorites {
                device_id,
                shuffle: *shuffle,
            },
            Self::Media { uri, .. } => Self::Tracks {
                uris: vec![uri.clone()],
                device_id,
            },
        }
    }

    pub async fn execute(&self, remote: &dyn RemoteControl) -> CallResult {
        debug!("Play call: {:?}", self);
        match self {
            Self::Context {
                context_uri,
                device_id,
                offset_uri,
            } => {
                remote
                    .play_context(context_uri, device_id.as_deref(), offset_uri.as_deref())
                    .await
            }
            Self::Tracks { uris, device_id } => {
                remote.play_tracks(uris, device_id.as_deref()).await
            }
            Self::Favorites { device_id, shuffle } => {
                remote.play_favorites(device_id.as_deref(), *shuffle).await
            }
            Self::Media { uri, media_type } => remote.play_media(uri, *media_type).await,
        }
    }
}

/// How a successful play got there
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Retried on the matching, already active device
    DeviceRetry { device_id: String },
    /// Moved playback to a sleeping device first
    DeviceTransfer { device_id: String },
    /// Context jump failed; played the track on its own
    TrackFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayOutcome {
    Played,
    Recovered(Recovery),
    Failed {
        error: RemoteError,
        /// The user should pick a device
        device_related: bool,
    },
}

impl PlayOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Toast for minor failures, alert with a device shortcut for targeting dead ends
    pub fn feedback(&self) -> Option<CardEvent> {
        match self {
            Self::Failed {
                error,
                device_related: true,
            } => Some(CardEvent::Alert {
                message: format!("Couldn't start playback: {}", error.message),
                choose_device: true,
            }),
            Self::Failed { error, .. } => Some(CardEvent::Toast {
                message: format!("Playback failed: {}", error.message),
            }),
            _ => None,
        }
    }
}

pub struct PlaybackOrchestrator {
    remote: Arc<dyn RemoteControl>,
    default_device: Option<String>,
    device_wake: Duration,
}

impl PlaybackOrchestrator {
    pub fn new(
        remote: Arc<dyn RemoteControl>,
        default_device: Option<String>,
        device_wake: Duration,
    ) -> Self {
        Self {
            remote,
            default_device,
            device_wake,
        }
    }

    /// Pick the device to play on.
    ///
    /// An active session keeps its device; the configured default only
    /// applies when nothing is playing or paused.
    pub fn resolve_device(&self, explicit: Option<&str>, session: &ActiveSession) -> Option<String> {
        let default = self.default_device.as_deref();
        // Asking for the default while something is active means "wherever it is playing"
        let explicit = explicit.filter(|d| !(session.is_active && Some(*d) == default));
        if let Some(device) = explicit {
            return Some(device.to_string());
        }
        if session.is_active {
            return session.device_name.clone();
        }
        default.map(str::to_string)
    }

    pub async fn play(&self, request: &PlayRequest, session: &ActiveSession) -> PlayOutcome {
        let target = self.resolve_device(request.device.as_deref(), session);
        let call = PlayCall::plan(request, target.as_deref());

        if target.is_none() && !session.is_active {
            warn!("Cannot play {}: no active session or device", request.uri);
            return PlayOutcome::Failed {
                error: RemoteError::new(NO_ACTIVE_PLAYER),
                device_related: true,
            };
        }

        let error = match call.execute(self.remote.as_ref()).await {
            Ok(()) => return PlayOutcome::Played,
            Err(e) => e,
        };

        // Restricted contexts reject jumps with errors that look device-related,
        // so any failed jump tries the track alone before device recovery
        if let PlayCall::Context {
            offset_uri: Some(offset),
            ..
        } = &call
        {
            warn!("Context jump failed ({}), playing the track alone", error);
            let fallback = PlayCall::plan(
                &PlayRequest::new(offset.clone(), MediaType::Track),
                target.as_deref(),
            );
            return match fallback.execute(self.remote.as_ref()).await {
                Ok(()) => PlayOutcome::Recovered(Recovery::TrackFallback),
                Err(e) if e.is_device_error() => {
                    self.recover_device(&fallback, target.as_deref(), e).await
                }
                Err(e) => PlayOutcome::Failed {
                    error: e,
                    device_related: false,
                },
            };
        }

        if error.is_device_error() {
            return self.recover_device(&call, target.as_deref(), error).await;
        }

        warn!("Play failed: {}", error);
        PlayOutcome::Failed {
            error,
            device_related: false,
        }
    }

    async fn recover_device(
        &self,
        call: &PlayCall,
        target: Option<&str>,
        error: RemoteError,
    ) -> PlayOutcome {
        let failed = |error: RemoteError| PlayOutcome::Failed {
            error,
            device_related: true,
        };

        let Some(target) = target else {
            warn!("Device error with no target device: {}", error);
            return failed(error);
        };

        info!("Device error for {} ({}), looking up devices", target, error);
        let devices = match self.remote.list_devices(true).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Device lookup failed: {}", e);
                return failed(error);
            }
        };

        let Some(device) = devices.into_iter().find(|d| d.matches(target)) else {
            warn!("No device matching {}", target);
            return failed(error);
        };

        if !device.is_active {
            info!("Transferring playback to {} ({})", device.name, device.id);
            if let Err(e) = self.remote.transfer_playback(&device.id).await {
                warn!("Transfer to {} failed: {}", device.name, e);
                return failed(e);
            }
            tokio::time::sleep(self.device_wake).await;
        }

        match call.on_device(&device.id).execute(self.remote.as_ref()).await {
            Ok(()) if device.is_active => PlayOutcome::Recovered(Recovery::DeviceRetry {
                device_id: device.id,
            }),
            Ok(()) => PlayOutcome::Recovered(Recovery::DeviceTransfer {
                device_id: device.id,
            }),
            Err(e) => {
                warn!("Retry on {} failed: {}", device.name, e);
                failed(e)
            }
        }
    }
}
