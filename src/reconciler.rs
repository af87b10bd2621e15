//! Reconciler - single source of truth for "what is playing now"
//!
//! Merges authoritative snapshots pushed by the media player entity with
//! short-lived local predictions made when the user starts something.
//!
//! ```text
//! predict ──► lock window opens (3.5s click / 3s skip)
//!                │
//! snapshot ──────┤ track == stale id  → suppressed
//!                │ track != stale id  → unlock, accept
//!                └ window elapsed     → accept
//! ```
//!
//! [`ReconcilerState::reduce`] is a pure `(state, event) -> (state, transition)`
//! function; [`Reconciler`] wraps it for shared use and forwards transitions
//! to the bus.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::bus::{
    same_track_ref, track_id_from_uri, CardEvent, DisplayMetadata, FieldPatch, MediaType,
    PlaybackSnapshot, ReconciledNowPlayingState, RenderDecision, SharedBus, ViewMode,
};
use crate::config::TimingConfig;
use crate::favorites::FavoriteCache;

/// Title shown while a prediction has no title of its own
pub const LOADING_PLACEHOLDER: &str = "Loading...";

// =============================================================================
// Title matching
// =============================================================================

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[\(\[][^\)\]]*[\)\]]").expect("static pattern"));

/// Lowercased title with parenthetical and bracketed parts removed
pub fn normalize_title(title: &str) -> String {
    BRACKETED.replace_all(title, "").trim().to_lowercase()
}

/// "Song (Remastered 2011)" and "Song [Live]" both match "Song"
pub fn titles_match(a: &str, b: &str) -> bool {
    let a = normalize_title(a);
    !a.is_empty() && a == normalize_title(b)
}

fn is_song_change(prev: &ReconciledNowPlayingState, next: &ReconciledNowPlayingState) -> bool {
    prev.track_id != next.track_id && !titles_match(&prev.title, &next.title)
}

fn diff_fields(
    prev: &ReconciledNowPlayingState,
    next: &ReconciledNowPlayingState,
) -> Vec<FieldPatch> {
    let mut patches = Vec::new();
    if prev.title != next.title {
        patches.push(FieldPatch::Title(next.title.clone()));
    }
    if prev.artist != next.artist {
        patches.push(FieldPatch::Artist(next.artist.clone()));
    }
    if prev.device != next.device {
        patches.push(FieldPatch::Device(next.device.clone()));
    }
    if prev.image_url != next.image_url {
        patches.push(FieldPatch::Image(next.image_url.clone()));
    }
    if prev.is_playing != next.is_playing {
        patches.push(FieldPatch::Playing(next.is_playing));
    }
    if prev.is_favorite != next.is_favorite {
        patches.push(FieldPatch::Favorite(next.is_favorite));
    }
    if (prev.volume - next.volume).abs() > f32::EPSILON {
        patches.push(FieldPatch::Volume(next.volume));
    }
    patches
}

// =============================================================================
// State
// =============================================================================

/// Which user action opened the lock window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// Click-to-play and queue jumps
    Click,
    /// Skip next/previous
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockWindows {
    pub click: Duration,
    pub skip: Duration,
}

impl LockWindows {
    pub fn duration(&self, kind: LockKind) -> Duration {
        match kind {
            LockKind::Click => self.click,
            LockKind::Skip => self.skip,
        }
    }
}

impl Default for LockWindows {
    fn default() -> Self {
        Self {
            click: Duration::from_millis(3500),
            skip: Duration::from_millis(3000),
        }
    }
}

impl From<&TimingConfig> for LockWindows {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            click: timing.click_lock(),
            skip: timing.skip_lock(),
        }
    }
}

/// Locally predicted playback, shown until the entity confirms or the lock expires
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticPrediction {
    /// `None` for context plays: the first track is not known in advance
    pub predicted_track_id: Option<String>,
    pub title: String,
    pub artist: String,
    pub image_url: String,
    pub created_at: Instant,
    /// Track being replaced; snapshots still reporting it are ignored
    pub stale_track_id: Option<String>,
}

/// What the browse views highlight as playing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Highlight {
    pub track_uri: Option<String>,
    pub context_uri: Option<String>,
    pub is_playing: bool,
}

/// Whether the entity currently owns a session, and on which device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveSession {
    pub is_active: bool,
    pub device_name: Option<String>,
}

/// Inputs to the reconciler
#[derive(Debug, Clone)]
pub enum ReconcilerEvent {
    /// The user started something; show it before the service confirms
    Predict {
        uri: String,
        media_type: MediaType,
        meta: DisplayMetadata,
        context_uri: Option<String>,
        lock: LockKind,
        now: Instant,
    },
    /// The entity pushed a new state
    Snapshot {
        snapshot: PlaybackSnapshot,
        now: Instant,
    },
    /// Optimistic favorite write, or a rollback to the previous value
    FavoriteSet { track_id: String, value: bool },
    /// Values verified against the service
    FavoritesVerified { values: HashMap<String, bool> },
    PlayingSet { is_playing: bool },
    VolumeSet { level: f32 },
    ViewModeSet { mode: ViewMode },
}

/// Result of applying one event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transition {
    /// Render work for the now-playing row, `None` when nothing visible changed
    pub render: Option<RenderDecision>,
    /// New highlighting, when it changed
    pub highlight: Option<Highlight>,
    /// Favorite flags that changed
    pub favorites_changed: Vec<(String, bool)>,
    /// The snapshot described the state being replaced and was dropped
    pub suppressed: bool,
}

impl Transition {
    fn suppressed(highlight: Option<Highlight>) -> Self {
        Self {
            highlight,
            suppressed: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcilerState {
    windows: LockWindows,
    prediction: Option<OptimisticPrediction>,
    lock_until: Option<Instant>,
    highlight: Highlight,
    last_snapshot: Option<PlaybackSnapshot>,
    rendered: Option<ReconciledNowPlayingState>,
    view_mode: ViewMode,
    favorites: FavoriteCache,
}

impl ReconcilerState {
    pub fn new(windows: LockWindows) -> Self {
        Self {
            windows,
            ..Self::default()
        }
    }

    /// Apply one event
    pub fn reduce(mut self, event: ReconcilerEvent) -> (Self, Transition) {
        let transition = match event {
            ReconcilerEvent::Predict {
                uri,
                media_type,
                meta,
                context_uri,
                lock,
                now,
            } => self.predict(uri, media_type, meta, context_uri, lock, now),
            ReconcilerEvent::Snapshot { snapshot, now } => self.snapshot(snapshot, now),
            ReconcilerEvent::FavoriteSet { track_id, value } => {
                self.favorites.set(track_id.clone(), value);
                let mut transition = self.rerender(|_| {});
                transition.favorites_changed.push((track_id, value));
                transition
            }
            ReconcilerEvent::FavoritesVerified { values } => {
                let changed = self.favorites.merge_remote(&values);
                let mut transition = self.rerender(|_| {});
                transition.favorites_changed = changed;
                transition
            }
            ReconcilerEvent::PlayingSet { is_playing } => {
                self.highlight.is_playing = is_playing;
                let mut transition = self.rerender(|s| s.is_playing = is_playing);
                transition.highlight = Some(self.highlight.clone());
                transition
            }
            ReconcilerEvent::VolumeSet { level } => {
                let level = level.clamp(0.0, 1.0);
                self.rerender(|s| s.volume = level)
            }
            ReconcilerEvent::ViewModeSet { mode } => {
                self.view_mode = mode;
                self.rerender(|_| {})
            }
        };
        (self, transition)
    }

    fn predict(
        &mut self,
        uri: String,
        media_type: MediaType,
        meta: DisplayMetadata,
        context_uri: Option<String>,
        lock: LockKind,
        now: Instant,
    ) -> Transition {
        // The id on screen now is the one about to go stale. A context
        // prediction shows no id, so the track it replaced stays stale.
        let stale_track_id = self
            .rendered
            .as_ref()
            .map(|r| r.track_id.clone())
            .filter(|id| !id.is_empty())
            .or_else(|| {
                self.locked_prediction(now)
                    .and_then(|p| p.stale_track_id.clone())
            });

        let predicted_track_id = match media_type {
            MediaType::Track | MediaType::Episode => Some(track_id_from_uri(&uri).to_string()),
            _ => None,
        };

        let prediction = OptimisticPrediction {
            predicted_track_id,
            title: meta
                .title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| LOADING_PLACEHOLDER.to_string()),
            artist: meta.artist.unwrap_or_default(),
            image_url: meta.image_url.unwrap_or_default(),
            created_at: now,
            stale_track_id,
        };

        self.lock_until = Some(now + self.windows.duration(lock));
        debug!(
            "Prediction {:?} (replacing {:?}), locked for {:?}",
            prediction.predicted_track_id,
            prediction.stale_track_id,
            self.windows.duration(lock)
        );

        let context_uri = context_uri.or_else(|| media_type.is_context().then(|| uri.clone()));
        let track_uri = match media_type {
            MediaType::Track | MediaType::Episode => Some(uri),
            _ => None,
        };
        self.highlight = Highlight {
            track_uri,
            context_uri,
            is_playing: true,
        };

        let next = self.state_from_prediction(&prediction);
        self.prediction = Some(prediction);

        Transition {
            render: self.render(next),
            highlight: Some(self.highlight.clone()),
            ..Transition::default()
        }
    }

    fn snapshot(&mut self, snapshot: PlaybackSnapshot, now: Instant) -> Transition {
        // Highlighting follows the entity even while the lock holds the row
        let highlight = Highlight {
            track_uri: snapshot.track_uri.clone(),
            context_uri: snapshot.context_uri.clone(),
            is_playing: snapshot.is_playing,
        };
        let highlight = (highlight != self.highlight).then(|| {
            self.highlight = highlight;
            self.highlight.clone()
        });

        if let Some(lock_until) = self.lock_until {
            if now < lock_until {
                let stale = self
                    .prediction
                    .as_ref()
                    .and_then(|p| p.stale_track_id.as_deref());
                let age = self
                    .prediction
                    .as_ref()
                    .map(|p| now.saturating_duration_since(p.created_at));
                match snapshot.track_id() {
                    None => {
                        debug!("Ignoring snapshot without track during lock window");
                        return Transition::suppressed(highlight);
                    }
                    Some(id) if stale.is_some_and(|s| same_track_ref(id, s)) => {
                        debug!("Ignoring stale snapshot for {}", id);
                        return Transition::suppressed(highlight);
                    }
                    Some(id) => debug!("Snapshot for {} arrived after {:?}, unlocking", id, age),
                }
            } else {
                debug!("Lock window expired, accepting snapshot");
            }
            self.lock_until = None;
            self.prediction = None;
        }

        let next = self.state_from_snapshot(&snapshot);
        self.last_snapshot = Some(snapshot);

        Transition {
            render: self.render(next),
            highlight,
            ..Transition::default()
        }
    }

    /// Recompute the current rendered state with a tweak and diff it
    fn rerender(&mut self, tweak: impl FnOnce(&mut ReconciledNowPlayingState)) -> Transition {
        let Some(mut next) = self.rendered.clone() else {
            return Transition::default();
        };
        tweak(&mut next);
        next.is_favorite = self.favorites.is_favorite(&next.track_id);
        next.view_mode = self.view_mode;
        Transition {
            render: self.render(next),
            ..Transition::default()
        }
    }

    fn state_from_prediction(&self, prediction: &OptimisticPrediction) -> ReconciledNowPlayingState {
        let base = self.rendered.clone().unwrap_or_default();
        let track_id = prediction.predicted_track_id.clone().unwrap_or_default();
        ReconciledNowPlayingState {
            is_favorite: self.favorites.is_favorite(&track_id),
            track_id,
            title: prediction.title.clone(),
            artist: prediction.artist.clone(),
            device: base.device,
            image_url: prediction.image_url.clone(),
            is_playing: true,
            volume: base.volume,
            view_mode: self.view_mode,
        }
    }

    /// Missing snapshot fields keep their previous value
    fn state_from_snapshot(&self, snapshot: &PlaybackSnapshot) -> ReconciledNowPlayingState {
        let base = self.rendered.clone().unwrap_or_default();
        let track_id = snapshot
            .track_id()
            .map(str::to_string)
            .unwrap_or(base.track_id);
        ReconciledNowPlayingState {
            is_favorite: self.favorites.is_favorite(&track_id),
            track_id,
            title: snapshot.title.clone().unwrap_or(base.title),
            artist: snapshot.artist.clone().unwrap_or(base.artist),
            device: snapshot.device_name.clone().unwrap_or(base.device),
            image_url: snapshot.image_url.clone().unwrap_or(base.image_url),
            is_playing: snapshot.is_playing,
            volume: snapshot.volume.map(|v| v.clamp(0.0, 1.0)).unwrap_or(base.volume),
            view_mode: self.view_mode,
        }
    }

    /// Same song and same view mode patches; anything else renders in full
    fn render(&mut self, next: ReconciledNowPlayingState) -> Option<RenderDecision> {
        let decision = match &self.rendered {
            Some(prev) if prev.view_mode == next.view_mode && !is_song_change(prev, &next) => {
                let patches = diff_fields(prev, &next);
                if patches.is_empty() {
                    None
                } else {
                    Some(RenderDecision::Patch {
                        state: next.clone(),
                        patches,
                    })
                }
            }
            _ => Some(RenderDecision::Full {
                state: next.clone(),
            }),
        };
        self.rendered = Some(next);
        decision
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn rendered(&self) -> Option<&ReconciledNowPlayingState> {
        self.rendered.as_ref()
    }

    pub fn highlight(&self) -> &Highlight {
        &self.highlight
    }

    pub fn is_locked(&self, now: Instant) -> bool {
        self.lock_until.is_some_and(|until| now < until)
    }

    /// The outstanding prediction, if its lock window is still open
    pub fn locked_prediction(&self, now: Instant) -> Option<&OptimisticPrediction> {
        if self.is_locked(now) {
            self.prediction.as_ref()
        } else {
            None
        }
    }

    pub fn session(&self) -> ActiveSession {
        match &self.last_snapshot {
            Some(snapshot) => ActiveSession {
                is_active: snapshot.state.is_active(),
                device_name: snapshot.device_name.clone(),
            },
            None => ActiveSession {
                is_active: false,
                device_name: None,
            },
        }
    }

    pub fn favorite(&self, track_id: &str) -> bool {
        self.favorites.is_favorite(track_id)
    }
}

// =============================================================================
// Shared handle
// =============================================================================

/// Shared reconciler used by the queue manager and the coordinator.
///
/// Each event is reduced under one lock, so a prediction (including its
/// highlighting) is complete before any snapshot handler can observe it.
pub struct Reconciler {
    state: Mutex<ReconcilerState>,
    bus: SharedBus,
}

impl Reconciler {
    pub fn new(windows: LockWindows, bus: SharedBus) -> Self {
        Self {
            state: Mutex::new(ReconcilerState::new(windows)),
            bus,
        }
    }

    /// Reduce an event and publish the resulting render work
    pub async fn apply(&self, event: ReconcilerEvent) -> Transition {
        let transition = {
            let mut guard = self.state.lock().await;
            let current = std::mem::take(&mut *guard);
            let (next, transition) = current.reduce(event);
            *guard = next;
            transition
        };
        self.publish(&transition);
        transition
    }

    pub async fn predict(
        &self,
        uri: &str,
        media_type: MediaType,
        meta: DisplayMetadata,
        context_uri: Option<String>,
        lock: LockKind,
    ) -> Transition {
        self.apply(ReconcilerEvent::Predict {
            uri: uri.to_string(),
            media_type,
            meta,
            context_uri,
            lock,
            now: Instant::now(),
        })
        .await
    }

    pub async fn apply_snapshot(&self, snapshot: PlaybackSnapshot) -> Transition {
        self.apply(ReconcilerEvent::Snapshot {
            snapshot,
            now: Instant::now(),
        })
        .await
    }

    /// Run a read-only query against the current state
    pub async fn read<R>(&self, query: impl FnOnce(&ReconcilerState) -> R) -> R {
        let guard = self.state.lock().await;
        query(&guard)
    }

    fn publish(&self, transition: &Transition) {
        if let Some(decision) = &transition.render {
            self.bus.publish(CardEvent::NowPlaying {
                decision: decision.clone(),
            });
        }
        if let Some(highlight) = &transition.highlight {
            self.bus.publish(CardEvent::HighlightChanged {
                track_uri: highlight.track_uri.clone(),
                context_uri: highlight.context_uri.clone(),
                is_playing: highlight.is_playing,
            });
        }
        for (track_id, value) in &transition.favorites_changed {
            self.bus.publish(CardEvent::FavoriteChanged {
                track_id: track_id.clone(),
                value: *value,
            });
        }
    }
}
