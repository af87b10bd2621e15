//! CardCoordinator - the surface the presentation layer talks to
//!
//! Wires the reconciler, queue manager and orchestrator together, consumes
//! pushed snapshots from the bus, and turns remote failures into toasts,
//! alerts and inline placeholders. Popups are only published while this
//! instance is the active one in the [`InstanceRegistry`].

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::lastfm::LastFmClient;
use crate::adapters::traits::{CallResult, RemoteControl};
use crate::bus::{
    CardEvent, DeviceDescriptor, DisplayMetadata, MediaType, PlaybackSnapshot, QueueItem,
    ReconciledNowPlayingState, SharedBus, SimilarItem, ViewMode,
};
use crate::config::CardConfig;
use crate::orchestrator::{PlayOutcome, PlayRequest, PlaybackOrchestrator};
use crate::queue::QueueManager;
use crate::reconciler::{LockKind, LockWindows, Reconciler, ReconcilerEvent, Transition};
use crate::registry::{InstanceId, InstanceRegistry};

pub struct CardCoordinator {
    id: InstanceId,
    registry: Arc<InstanceRegistry>,
    bus: SharedBus,
    remote: Arc<dyn RemoteControl>,
    reconciler: Arc<Reconciler>,
    queue: Arc<QueueManager>,
    orchestrator: PlaybackOrchestrator,
    lastfm: Option<LastFmClient>,
}

impl CardCoordinator {
    pub async fn new(
        config: &CardConfig,
        remote: Arc<dyn RemoteControl>,
        bus: SharedBus,
        registry: Arc<InstanceRegistry>,
    ) -> Self {
        let id = registry.register().await;
        let reconciler = Arc::new(Reconciler::new(
            LockWindows::from(&config.timing),
            bus.clone(),
        ));
        let queue = Arc::new(QueueManager::new(
            remote.clone(),
            reconciler.clone(),
            bus.clone(),
            config.timing.clone(),
        ));
        let orchestrator = PlaybackOrchestrator::new(
            remote.clone(),
            config.default_device.clone(),
            config.timing.device_wake(),
        );

        Self {
            id,
            registry,
            bus,
            remote,
            reconciler,
            queue,
            orchestrator,
            lastfm: None,
        }
    }

    pub fn with_lastfm(mut self, lastfm: LastFmClient) -> Self {
        self.lastfm = Some(lastfm);
        self
    }

    pub fn instance_id(&self) -> InstanceId {
        self.id
    }

    /// Make this instance the one that shows popups
    pub async fn activate(&self) {
        self.registry.activate(self.id).await;
    }

    /// Render and feedback events
    pub fn subscribe(&self) -> broadcast::Receiver<CardEvent> {
        self.bus.subscribe()
    }

    /// The now-playing row as last rendered
    pub async fn now_playing(&self) -> Option<ReconciledNowPlayingState> {
        self.reconciler.read(|s| s.rendered().cloned()).await
    }

    /// Queue rows as currently shown
    pub async fn queue_rows(&self) -> Vec<QueueItem> {
        self.queue.rendered().await
    }

    /// Publish a popup, unless another instance owns them
    async fn notify(&self, event: CardEvent) {
        if self.registry.is_active(self.id).await {
            self.bus.publish(event);
        } else {
            debug!(
                "Instance {} inactive, dropping {}",
                self.id,
                event.event_type()
            );
        }
    }

    async fn toast(&self, message: impl Into<String>) {
        self.notify(CardEvent::Toast {
            message: message.into(),
        })
        .await;
    }

    // =========================================================================
    // Playback
    // =========================================================================

    /// Entry point for every user-initiated play action
    pub async fn trigger_optimistic_playback(
        &self,
        uri: &str,
        media_type: MediaType,
        meta: DisplayMetadata,
        context_uri: Option<String>,
    ) -> PlayOutcome {
        let request = PlayRequest {
            uri: uri.to_string(),
            media_type,
            context_uri,
            device: None,
        };
        self.play(request, meta).await
    }

    /// Play on a specific device
    pub async fn play_on_device(
        &self,
        request: PlayRequest,
        meta: DisplayMetadata,
    ) -> PlayOutcome {
        self.play(request, meta).await
    }

    async fn play(&self, request: PlayRequest, meta: DisplayMetadata) -> PlayOutcome {
        let session = self.reconciler.read(|s| s.session()).await;
        self.reconciler
            .predict(
                &request.uri,
                request.media_type,
                meta,
                request.context_uri.clone(),
                LockKind::Click,
            )
            .await;

        let outcome = self.orchestrator.play(&request, &session).await;
        info!("Play {} -> {:?}", request.uri, outcome);
        if let Some(event) = outcome.feedback() {
            self.notify(event).await;
        }
        outcome
    }

    /// Apply a pushed snapshot; the queue follows accepted changes
    pub async fn apply_snapshot(&self, snapshot: PlaybackSnapshot) -> Transition {
        let transition = self.reconciler.apply_snapshot(snapshot).await;
        if transition.highlight.is_some() && !transition.suppressed {
            self.queue.refresh().await;
        }
        transition
    }

    pub async fn toggle_playback(&self) -> CallResult {
        let was_playing = self
            .reconciler
            .read(|s| s.rendered().map(|r| r.is_playing).unwrap_or(false))
            .await;
        let play = !was_playing;
        self.reconciler
            .apply(ReconcilerEvent::PlayingSet { is_playing: play })
            .await;

        let result = self.remote.toggle_playback(play).await;
        if let Err(e) = &result {
            warn!("Toggle playback failed: {}", e);
            self.reconciler
                .apply(ReconcilerEvent::PlayingSet {
                    is_playing: was_playing,
                })
                .await;
            self.toast(if play { "Couldn't play" } else { "Couldn't pause" })
                .await;
        }
        result
    }

    // =========================================================================
    // Queue
    // =========================================================================

    pub async fn refresh_queue(&self) -> bool {
        self.queue.refresh().await
    }

    /// Jump playback to a row of the queue, staying in the current context
    pub async fn jump_to_queue_item(&self, item: &QueueItem) -> PlayOutcome {
        let session = self.reconciler.read(|s| s.session()).await;
        self.queue.on_item_activated(item).await;

        let context_uri = self
            .reconciler
            .read(|s| s.highlight().context_uri.clone())
            .await;
        let request = PlayRequest {
            uri: item.uri.clone(),
            media_type: MediaType::Track,
            context_uri,
            device: None,
        };
        let outcome = self.orchestrator.play(&request, &session).await;
        if let Some(event) = outcome.feedback() {
            self.notify(event).await;
        }
        outcome
    }

    pub async fn skip_next(&self) -> CallResult {
        let result = self.queue.on_skip_next().await;
        if result.is_err() {
            self.toast("Couldn't skip").await;
        }
        result
    }

    pub async fn skip_previous(&self) -> CallResult {
        let result = self.queue.on_skip_previous().await;
        if result.is_err() {
            self.toast("Couldn't skip").await;
        }
        result
    }

    pub async fn add_to_queue(&self, uri: &str) -> CallResult {
        let result = self.remote.add_to_queue(uri).await;
        match &result {
            Ok(()) => {
                self.queue.refresh().await;
            }
            Err(e) => {
                warn!("Add to queue failed: {}", e);
                self.toast("Couldn't add to queue").await;
            }
        }
        result
    }

    // =========================================================================
    // Favorites
    // =========================================================================

    pub async fn get_favorite_state(&self, track_id: &str) -> bool {
        self.reconciler.read(|s| s.favorite(track_id)).await
    }

    /// Flip a favorite optimistically; on failure restore `previous`
    pub async fn toggle_favorite(&self, track_id: &str, previous: bool) -> CallResult {
        let value = !previous;
        self.reconciler
            .apply(ReconcilerEvent::FavoriteSet {
                track_id: track_id.to_string(),
                value,
            })
            .await;

        match self.remote.set_favorite(track_id, value).await {
            Ok(()) => {
                if !value {
                    self.notify(CardEvent::UndoFavoriteOffered {
                        track_id: track_id.to_string(),
                    })
                    .await;
                }
                Ok(())
            }
            Err(e) => {
                warn!("Favorite update for {} failed: {}", track_id, e);
                self.reconciler
                    .apply(ReconcilerEvent::FavoriteSet {
                        track_id: track_id.to_string(),
                        value: previous,
                    })
                    .await;
                self.toast("Couldn't update favorites").await;
                Err(e)
            }
        }
    }

    /// Re-add a track removed a moment ago
    pub async fn undo_favorite_removal(&self, track_id: &str) -> CallResult {
        self.toggle_favorite(track_id, false).await
    }

    /// Check ids against the service; returns how many cached values changed
    pub async fn verify_favorites(&self, track_ids: &[String]) -> usize {
        match self.remote.check_favorites(track_ids).await {
            Ok(values) => {
                let transition = self
                    .reconciler
                    .apply(ReconcilerEvent::FavoritesVerified { values })
                    .await;
                transition.favorites_changed.len()
            }
            Err(e) => {
                debug!("Favorite check failed: {}", e);
                0
            }
        }
    }

    // =========================================================================
    // Volume and view
    // =========================================================================

    pub async fn set_volume(&self, level: f32) -> CallResult {
        let previous = self
            .reconciler
            .read(|s| s.rendered().map(|r| r.volume))
            .await;
        self.reconciler
            .apply(ReconcilerEvent::VolumeSet { level })
            .await;

        let result = self.remote.set_volume(level.clamp(0.0, 1.0)).await;
        if let Err(e) = &result {
            warn!("Volume change failed: {}", e);
            if let Some(level) = previous {
                self.reconciler
                    .apply(ReconcilerEvent::VolumeSet { level })
                    .await;
            }
            self.toast("Couldn't change volume").await;
        }
        result
    }

    pub async fn set_view_mode(&self, mode: ViewMode) {
        self.reconciler
            .apply(ReconcilerEvent::ViewModeSet { mode })
            .await;
    }

    // =========================================================================
    // Devices
    // =========================================================================

    /// Devices for the picker; failures render the inline placeholder
    pub async fn list_devices(&self) -> Vec<DeviceDescriptor> {
        match self.remote.list_devices(true).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Device list failed: {}", e);
                self.bus.publish(CardEvent::DevicesUnavailable {
                    message: e.message,
                });
                Vec::new()
            }
        }
    }

    pub async fn transfer_to(&self, device_id: &str) -> CallResult {
        let result = self.remote.transfer_playback(device_id).await;
        if let Err(e) = &result {
            warn!("Transfer to {} failed: {}", device_id, e);
            self.toast("Couldn't switch device").await;
        }
        result
    }

    // =========================================================================
    // Recommendations
    // =========================================================================

    /// Artists similar to `artist`; empty when Last.fm is not configured
    pub async fn similar_artists(&self, artist: &str, limit: usize) -> Vec<SimilarItem> {
        let Some(lastfm) = &self.lastfm else {
            return Vec::new();
        };
        match lastfm.similar_artists(artist, limit).await {
            Ok(items) => items,
            Err(e) => {
                warn!("Similar artists lookup failed: {}", e);
                Vec::new()
            }
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Consume pushed snapshots until shutdown
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut rx = self.bus.subscribe();
        info!("Card instance {} running", self.id);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(CardEvent::SnapshotPushed { snapshot }) => {
                        self.apply_snapshot(snapshot).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Card lagged {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.queue.cancel_scheduled().await;
        self.registry.release(self.id).await;
        self.bus.publish(CardEvent::ShuttingDown { reason: None });
        info!("Card instance {} stopped", self.id);
    }
}
