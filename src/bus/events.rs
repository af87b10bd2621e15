//! Data model shared by the card core and the event types published on the bus.
//!
//! Snapshots arrive from the Home Assistant entity, predictions and render
//! decisions leave through [`CardEvent`] to whatever presentation layer is
//! subscribed.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Identifiers
// =============================================================================

/// Extract the bare id from a Spotify URI (`spotify:track:abc` -> `abc`).
///
/// Plain ids pass through unchanged.
pub fn track_id_from_uri(uri: &str) -> &str {
    uri.rsplit(':').next().unwrap_or(uri)
}

/// Whether two track references name the same track.
///
/// Accepts exact equality and URI-suffix matches, so `spotify:track:abc`
/// matches `abc`.
pub fn same_track_ref(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || a.ends_with(&format!(":{}", b)) || b.ends_with(&format!(":{}", a))
}

// =============================================================================
// Core Data Structures
// =============================================================================

/// Home Assistant media player state
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Playing,
    Paused,
    Idle,
    On,
    Off,
    Unavailable,
    #[default]
    Unknown,
}

impl PlayerState {
    /// A session is active when the player is playing or paused
    pub fn is_active(self) -> bool {
        matches!(self, Self::Playing | Self::Paused)
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Playing => write!(f, "playing"),
            Self::Paused => write!(f, "paused"),
            Self::Idle => write!(f, "idle"),
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<&str> for PlayerState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "playing" => Self::Playing,
            "paused" => Self::Paused,
            "idle" => Self::Idle,
            "on" => Self::On,
            "off" => Self::Off,
            "unavailable" => Self::Unavailable,
            _ => Self::Unknown,
        }
    }
}

/// Authoritative playback state pushed from the media player entity.
///
/// Replaced wholesale on every push.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlaybackSnapshot {
    /// Entity state (playing, paused, idle...)
    pub state: PlayerState,

    /// Currently playing track URI
    pub track_uri: Option<String>,

    /// Playing context (playlist, album, collection) URI
    pub context_uri: Option<String>,

    pub is_playing: bool,

    /// Name of the Spotify Connect device (entity `source`)
    pub device_name: Option<String>,

    pub title: Option<String>,
    pub artist: Option<String>,
    pub image_url: Option<String>,

    /// Volume in [0, 1]; `None` means the entity did not report it
    pub volume: Option<f32>,
}

impl PlaybackSnapshot {
    /// Bare track id of the snapshot, if any
    pub fn track_id(&self) -> Option<&str> {
        self.track_uri
            .as_deref()
            .filter(|uri| !uri.is_empty())
            .map(track_id_from_uri)
    }
}

/// Kind of media a play request refers to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Track,
    Playlist,
    Album,
    Artist,
    Show,
    Episode,
    #[serde(rename = "likedsongs")]
    LikedSongs,
}

impl MediaType {
    /// Context types are played with a context URI rather than a track list
    pub fn is_context(self) -> bool {
        matches!(
            self,
            Self::Playlist | Self::Album | Self::Artist | Self::Show
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Playlist => "playlist",
            Self::Album => "album",
            Self::Artist => "artist",
            Self::Show => "show",
            Self::Episode => "episode",
            Self::LikedSongs => "likedsongs",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display fields the UI already has for the item that triggered an action.
///
/// Any field may be empty; the reconciler fills in placeholders.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DisplayMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub image_url: Option<String>,
}

impl DisplayMetadata {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            artist: Some(artist.into()),
            image_url: None,
        }
    }
}

/// One row of the "up next" list
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueItem {
    pub id: Option<String>,
    pub uri: String,
    pub title: String,
    pub artist: String,
    pub image_url: Option<String>,
    pub duration_ms: Option<u64>,
}

impl QueueItem {
    /// Key used in the queue signature: the id, else the uri
    pub fn signature_key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.uri)
    }

    pub fn display_metadata(&self) -> DisplayMetadata {
        DisplayMetadata {
            title: Some(self.title.clone()),
            artist: Some(self.artist.clone()),
            image_url: self.image_url.clone(),
        }
    }
}

/// Ordered upcoming tracks as returned by the remote service
pub type QueueSnapshot = Vec<QueueItem>;

/// A Spotify Connect device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub device_type: String,
    pub is_active: bool,
}

impl DeviceDescriptor {
    /// Match against a device reference that may be either an id or a name
    pub fn matches(&self, target: &str) -> bool {
        self.id == target || self.name.eq_ignore_ascii_case(target)
    }
}

/// Lightweight recommendation entry; id and uri are resolved later by search
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarItem {
    pub name: String,
    pub media_type: MediaType,
    pub id: Option<String>,
    pub uri: Option<String>,
}

// =============================================================================
// Rendered state
// =============================================================================

/// How the now-playing row is laid out
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    #[default]
    Standard,
    VolumeAdjust,
}

/// The now-playing surface as it should appear on screen
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReconciledNowPlayingState {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub device: String,
    pub image_url: String,
    pub is_playing: bool,
    pub is_favorite: bool,
    pub volume: f32,
    pub view_mode: ViewMode,
}

/// A single targeted update of the now-playing row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldPatch {
    Title(String),
    Artist(String),
    Device(String),
    Image(String),
    Playing(bool),
    Favorite(bool),
    Volume(f32),
}

/// What the presentation layer must do to show a new reconciled state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderDecision {
    /// Re-render the whole now-playing row
    Full { state: ReconciledNowPlayingState },
    /// Apply individual field updates to the existing row
    Patch {
        state: ReconciledNowPlayingState,
        patches: Vec<FieldPatch>,
    },
}

impl RenderDecision {
    pub fn state(&self) -> &ReconciledNowPlayingState {
        match self {
            Self::Full { state } | Self::Patch { state, .. } => state,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }
}

// =============================================================================
// Bus Events
// =============================================================================

/// Row removed from the queue list, with its animation delay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowRemoval {
    pub key: String,
    pub delay_ms: u64,
}

/// All events published on the card bus.
///
/// - Inbound: snapshots pushed by the entity watcher
/// - Render: now-playing and queue updates for the presentation layer
/// - Feedback: toasts, alerts and undo affordances
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum CardEvent {
    // =========================================================================
    // Inbound
    // =========================================================================
    /// The media player entity reported a new state
    SnapshotPushed { snapshot: PlaybackSnapshot },

    // =========================================================================
    // Render
    // =========================================================================
    /// The now-playing row must be rendered or patched
    NowPlaying { decision: RenderDecision },

    /// Highlighting of the currently playing track/context changed
    HighlightChanged {
        track_uri: Option<String>,
        context_uri: Option<String>,
        is_playing: bool,
    },

    /// The upcoming queue was replaced
    QueueRendered { items: Vec<QueueItem> },

    /// Queue rows animate out (zipper on jump)
    QueueRowsRemoved { rows: Vec<RowRemoval> },

    /// Queue row hidden after being promoted to now playing
    QueueRowHidden { key: String },

    /// Now-playing row dimmed to acknowledge a "previous" click
    NowPlayingDimmed,

    /// Queue could not be loaded; render the inline placeholder
    QueueUnavailable { message: String },

    /// Device list could not be loaded; render the inline placeholder
    DevicesUnavailable { message: String },

    /// A favorite flag changed for a track (optimistic, reverted or verified)
    FavoriteChanged { track_id: String, value: bool },

    // =========================================================================
    // Feedback
    // =========================================================================
    /// Minor, recoverable issue
    Toast { message: String },

    /// Dead end that needs user action
    Alert {
        message: String,
        /// Offer the device picker shortcut
        choose_device: bool,
    },

    /// A track was removed from favorites and may be restored
    UndoFavoriteOffered { track_id: String },

    // =========================================================================
    // System
    // =========================================================================
    /// The card is shutting down
    ShuttingDown { reason: Option<String> },

    /// A watcher stopped
    AdapterStopped { adapter: String },
}

impl CardEvent {
    /// Get the event type as a string (for logging/filtering)
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SnapshotPushed { .. } => "snapshot_pushed",
            Self::NowPlaying { .. } => "now_playing",
            Self::HighlightChanged { .. } => "highlight_changed",
            Self::QueueRendered { .. } => "queue_rendered",
            Self::QueueRowsRemoved { .. } => "queue_rows_removed",
            Self::QueueRowHidden { .. } => "queue_row_hidden",
            Self::NowPlayingDimmed => "now_playing_dimmed",
            Self::QueueUnavailable { .. } => "queue_unavailable",
            Self::DevicesUnavailable { .. } => "devices_unavailable",
            Self::FavoriteChanged { .. } => "favorite_changed",
            Self::Toast { .. } => "toast",
            Self::Alert { .. } => "alert",
            Self::UndoFavoriteOffered { .. } => "undo_favorite_offered",
            Self::ShuttingDown { .. } => "shutting_down",
            Self::AdapterStopped { .. } => "adapter_stopped",
        }
    }

    /// Check if this event asks the presentation layer to redraw something
    pub fn is_render_event(&self) -> bool {
        matches!(
            self,
            Self::NowPlaying { .. }
                | Self::HighlightChanged { .. }
                | Self::QueueRendered { .. }
                | Self::QueueRowsRemoved { .. }
                | Self::QueueRowHidden { .. }
                | Self::NowPlayingDimmed
                | Self::QueueUnavailable { .. }
                | Self::DevicesUnavailable { .. }
                | Self::FavoriteChanged { .. }
        )
    }

    /// Check if this event is user feedback (toast, alert, undo)
    pub fn is_feedback_event(&self) -> bool {
        matches!(
            self,
            Self::Toast { .. } | Self::Alert { .. } | Self::UndoFavoriteOffered { .. }
        )
    }
}
