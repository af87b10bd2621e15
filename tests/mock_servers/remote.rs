//! In-memory RemoteControl that records every call
//!
//! Responses are scripted per test: canned devices, queue and snapshot,
//! plus one-shot failures queued per call kind.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use spotify_browser_core::adapters::{CallResult, RemoteControl, RemoteError};
use spotify_browser_core::bus::{
    DeviceDescriptor, MediaType, PlaybackSnapshot, QueueItem, QueueSnapshot,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    PlayContext {
        context_uri: String,
        device_id: Option<String>,
        offset_uri: Option<String>,
    },
    PlayTracks {
        uris: Vec<String>,
        device_id: Option<String>,
    },
    PlayFavorites {
        device_id: Option<String>,
        shuffle: bool,
    },
    PlayMedia {
        uri: String,
        media_type: MediaType,
    },
    TogglePlayback(bool),
    SkipNext,
    SkipPrevious,
    Transfer(String),
    SetFavorite(String, bool),
    AddToQueue(String),
    SetVolume(f32),
    ListDevices(bool),
    FetchQueue,
    CheckFavorites(Vec<String>),
    FetchSnapshot,
}

impl Call {
    /// Key used to script failures
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlayContext { .. } => "play_context",
            Self::PlayTracks { .. } => "play_tracks",
            Self::PlayFavorites { .. } => "play_favorites",
            Self::PlayMedia { .. } => "play_media",
            Self::TogglePlayback(_) => "toggle_playback",
            Self::SkipNext => "skip_next",
            Self::SkipPrevious => "skip_previous",
            Self::Transfer(_) => "transfer_playback",
            Self::SetFavorite(..) => "set_favorite",
            Self::AddToQueue(_) => "add_to_queue",
            Self::SetVolume(_) => "set_volume",
            Self::ListDevices(_) => "list_devices",
            Self::FetchQueue => "fetch_queue",
            Self::CheckFavorites(_) => "check_favorites",
            Self::FetchSnapshot => "fetch_snapshot",
        }
    }
}

#[derive(Default)]
struct Script {
    calls: Vec<Call>,
    failures: HashMap<&'static str, VecDeque<RemoteError>>,
    devices: Vec<DeviceDescriptor>,
    queue: QueueSnapshot,
    snapshot: PlaybackSnapshot,
    favorites: HashMap<String, bool>,
}

#[derive(Default)]
pub struct RecordingRemote {
    script: Mutex<Script>,
}

impl RecordingRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call of `kind` with `message`
    pub fn fail_next(&self, kind: &'static str, message: &str) {
        self.script
            .lock()
            .unwrap()
            .failures
            .entry(kind)
            .or_default()
            .push_back(RemoteError::new(message));
    }

    pub fn set_devices(&self, devices: Vec<DeviceDescriptor>) {
        self.script.lock().unwrap().devices = devices;
    }

    pub fn set_queue(&self, queue: Vec<QueueItem>) {
        self.script.lock().unwrap().queue = queue;
    }

    pub fn set_snapshot(&self, snapshot: PlaybackSnapshot) {
        self.script.lock().unwrap().snapshot = snapshot;
    }

    pub fn set_remote_favorites(&self, favorites: HashMap<String, bool>) {
        self.script.lock().unwrap().favorites = favorites;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    /// Calls other than reads
    pub fn commands(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::FetchQueue | Call::FetchSnapshot))
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.calls().iter().filter(|c| c.kind() == kind).count()
    }

    pub fn clear_calls(&self) {
        self.script.lock().unwrap().calls.clear();
    }

    fn record(&self, call: Call) -> CallResult {
        let mut script = self.script.lock().unwrap();
        let kind = call.kind();
        script.calls.push(call);
        match script.failures.get_mut(kind).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

pub fn device(id: &str, name: &str, is_active: bool) -> DeviceDescriptor {
    DeviceDescriptor {
        id: id.to_string(),
        name: name.to_string(),
        device_type: "Speaker".to_string(),
        is_active,
    }
}

pub fn track(id: &str, title: &str) -> QueueItem {
    QueueItem {
        id: Some(id.to_string()),
        uri: format!("spotify:track:{}", id),
        title: title.to_string(),
        artist: format!("{} Artist", title),
        image_url: None,
        duration_ms: Some(200_000),
    }
}

#[async_trait]
impl RemoteControl for RecordingRemote {
    async fn play_context(
        &self,
        context_uri: &str,
        device_id: Option<&str>,
        offset_uri: Option<&str>,
    ) -> CallResult {
        self.record(Call::PlayContext {
            context_uri: context_uri.to_string(),
            device_id: device_id.map(str::to_string),
            offset_uri: offset_uri.map(str::to_string),
        })
    }

    async fn play_tracks(&self, uris: &[String], device_id: Option<&str>) -> CallResult {
        self.record(Call::PlayTracks {
            uris: uris.to_vec(),
            device_id: device_id.map(str::to_string),
        })
    }

    async fn play_favorites(&self, device_id: Option<&str>, shuffle: bool) -> CallResult {
        self.record(Call::PlayFavorites {
            device_id: device_id.map(str::to_string),
            shuffle,
        })
    }

    async fn play_media(&self, uri: &str, media_type: MediaType) -> CallResult {
        self.record(Call::PlayMedia {
            uri: uri.to_string(),
            media_type,
        })
    }

    async fn toggle_playback(&self, play: bool) -> CallResult {
        self.record(Call::TogglePlayback(play))
    }

    async fn skip_next(&self) -> CallResult {
        self.record(Call::SkipNext)
    }

    async fn skip_previous(&self) -> CallResult {
        self.record(Call::SkipPrevious)
    }

    async fn transfer_playback(&self, device_id: &str) -> CallResult {
        self.record(Call::Transfer(device_id.to_string()))
    }

    async fn set_favorite(&self, track_id: &str, value: bool) -> CallResult {
        self.record(Call::SetFavorite(track_id.to_string(), value))
    }

    async fn add_to_queue(&self, uri: &str) -> CallResult {
        self.record(Call::AddToQueue(uri.to_string()))
    }

    async fn set_volume(&self, level: f32) -> CallResult {
        self.record(Call::SetVolume(level))
    }

    async fn list_devices(&self, refresh: bool) -> Result<Vec<DeviceDescriptor>, RemoteError> {
        self.record(Call::ListDevices(refresh))?;
        Ok(self.script.lock().unwrap().devices.clone())
    }

    async fn fetch_queue(&self) -> Result<QueueSnapshot, RemoteError> {
        self.record(Call::FetchQueue)?;
        Ok(self.script.lock().unwrap().queue.clone())
    }

    async fn check_favorites(
        &self,
        track_ids: &[String],
    ) -> Result<HashMap<String, bool>, RemoteError> {
        self.record(Call::CheckFavorites(track_ids.to_vec()))?;
        let script = self.script.lock().unwrap();
        Ok(track_ids
            .iter()
            .map(|id| (id.clone(), script.favorites.get(id).copied().unwrap_or(false)))
            .collect())
    }

    async fn fetch_snapshot(&self) -> Result<PlaybackSnapshot, RemoteError> {
        self.record(Call::FetchSnapshot)?;
        Ok(self.script.lock().unwrap().snapshot.clone())
    }
}
