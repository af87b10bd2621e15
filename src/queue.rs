//! Queue manager - the "up next" list
//!
//! Renders the remote queue, skips redundant renders via a signature of the
//! item keys, and keeps the list in step with optimistic jumps and skips.
//! Follow-up refreshes and syncs run as one [`ScheduledTasks`] group; a new
//! jump or skip cancels whatever the previous one scheduled.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::traits::{CallResult, RemoteControl};
use crate::bus::{same_track_ref, CardEvent, MediaType, QueueItem, RowRemoval, SharedBus};
use crate::config::TimingConfig;
use crate::reconciler::{LockKind, Reconciler};

/// Order-preserving key list used to detect "no real change"
pub fn signature(items: &[QueueItem]) -> String {
    items
        .iter()
        .map(QueueItem::signature_key)
        .collect::<Vec<_>>()
        .join(",")
}

/// Removal plan for a zipper animation: row `i` leaves after `i * stagger`
pub fn zipper_plan(removed: &[QueueItem], stagger: Duration) -> Vec<RowRemoval> {
    let stagger_ms = u64::try_from(stagger.as_millis()).unwrap_or(u64::MAX);
    removed
        .iter()
        .enumerate()
        .map(|(i, item)| RowRemoval {
            key: item.signature_key().to_string(),
            delay_ms: stagger_ms.saturating_mul(i as u64),
        })
        .collect()
}

/// Drop the head row when it is the track currently predicted as playing
fn without_predicted_head(mut items: Vec<QueueItem>, predicted: Option<&str>) -> Vec<QueueItem> {
    let Some(predicted) = predicted else {
        return items;
    };
    let head_matches = items.first().is_some_and(|head| {
        same_track_ref(&head.uri, predicted)
            || head.id.as_deref().is_some_and(|id| same_track_ref(id, predicted))
    });
    if head_matches {
        items.remove(0);
    }
    items
}

/// `m:ss` for queue rows, `--:--` when unknown or zero.
///
/// Hours are dropped; queue rows never show them.
pub fn format_duration(duration_ms: Option<u64>) -> String {
    match duration_ms {
        Some(ms) if ms > 0 => {
            let total_secs = ms / 1000;
            format!("{}:{:02}", (total_secs / 60) % 60, total_secs % 60)
        }
        _ => "--:--".to_string(),
    }
}

// =============================================================================
// ScheduledTasks
// =============================================================================

/// Group of delayed tasks sharing one cancellation token
pub struct ScheduledTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Default for ScheduledTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduledTasks {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Run `task` after `delay` unless the group is cancelled first
    pub fn schedule<F, Fut>(&mut self, delay: Duration, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handles.retain(|h| !h.is_finished());
        let cancel = self.cancel.clone();
        self.handles.push(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => task().await,
            }
        }));
    }

    /// Cancel everything scheduled so far; the group stays usable
    pub fn cancel_all(&mut self) {
        self.cancel.cancel();
        // Fresh token so tasks scheduled after this are not born cancelled
        self.cancel = CancellationToken::new();
        self.handles.clear();
    }

    /// Tasks that have not finished yet
    pub fn pending(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for ScheduledTasks {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// QueueManager
// =============================================================================

#[derive(Default)]
struct QueueState {
    last_signature: Option<String>,
    /// Rows as currently shown, after optimistic removals
    rendered: Vec<QueueItem>,
}

impl QueueState {
    /// Keep the signature in step with what is on screen
    fn resign(&mut self) {
        self.last_signature = Some(signature(&self.rendered));
    }
}

#[derive(Debug, Clone, Copy)]
enum Followup {
    Refresh,
    Sync,
}

pub struct QueueManager {
    remote: Arc<dyn RemoteControl>,
    reconciler: Arc<Reconciler>,
    bus: SharedBus,
    timing: TimingConfig,
    state: Mutex<QueueState>,
    tasks: Mutex<ScheduledTasks>,
}

impl QueueManager {
    pub fn new(
        remote: Arc<dyn RemoteControl>,
        reconciler: Arc<Reconciler>,
        bus: SharedBus,
        timing: TimingConfig,
    ) -> Self {
        Self {
            remote,
            reconciler,
            bus,
            timing,
            state: Mutex::new(QueueState::default()),
            tasks: Mutex::new(ScheduledTasks::new()),
        }
    }

    /// Fetch the queue and render it if it changed.
    ///
    /// Returns `true` when a render was published.
    pub async fn refresh(&self) -> bool {
        let items = match self.remote.fetch_queue().await {
            Ok(items) => items,
            Err(e) => {
                warn!("Queue fetch failed: {}", e);
                self.bus.publish(CardEvent::QueueUnavailable {
                    message: e.message,
                });
                return false;
            }
        };

        let now = Instant::now();
        let predicted = self
            .reconciler
            .read(|s| {
                s.locked_prediction(now)
                    .and_then(|p| p.predicted_track_id.clone())
            })
            .await;
        let items = without_predicted_head(items, predicted.as_deref());
        let sig = signature(&items);

        {
            let mut state = self.state.lock().await;
            if state.last_signature.as_deref() == Some(sig.as_str()) {
                debug!("Queue unchanged ({} items)", items.len());
                return false;
            }
            state.last_signature = Some(sig);
            state.rendered = items.clone();
        }

        debug!("Queue rendered ({} items)", items.len());
        self.bus.publish(CardEvent::QueueRendered { items });
        true
    }

    /// Jump to a queue row: predict it, zip out the rows up to it, refresh later.
    ///
    /// The play call itself is issued by the caller.
    pub async fn on_item_activated(self: &Arc<Self>, item: &QueueItem) {
        let context_uri = self
            .reconciler
            .read(|s| s.highlight().context_uri.clone())
            .await;
        self.reconciler
            .predict(
                &item.uri,
                MediaType::Track,
                item.display_metadata(),
                context_uri,
                LockKind::Click,
            )
            .await;

        let rows = {
            let mut state = self.state.lock().await;
            let key = item.signature_key();
            match state.rendered.iter().position(|r| r.signature_key() == key) {
                Some(pos) => {
                    let removed: Vec<QueueItem> = state.rendered.drain(..=pos).collect();
                    state.resign();
                    zipper_plan(&removed, Duration::from_millis(self.timing.row_stagger_ms))
                }
                None => Vec::new(),
            }
        };
        if !rows.is_empty() {
            debug!("Zipping out {} queue rows", rows.len());
            self.bus.publish(CardEvent::QueueRowsRemoved { rows });
        }

        let weak = Arc::downgrade(self);
        let mut tasks = self.tasks.lock().await;
        tasks.cancel_all();
        tasks.schedule(self.timing.jump_refresh(), move || {
            Self::followup(weak, Followup::Refresh)
        });
    }

    /// Promote the first row to now playing, then skip
    pub async fn on_skip_next(self: &Arc<Self>) -> CallResult {
        let head = {
            let mut state = self.state.lock().await;
            if state.rendered.is_empty() {
                None
            } else {
                let head = state.rendered.remove(0);
                state.resign();
                Some(head)
            }
        };

        if let Some(item) = &head {
            let context_uri = self
                .reconciler
                .read(|s| s.highlight().context_uri.clone())
                .await;
            self.reconciler
                .predict(
                    &item.uri,
                    MediaType::Track,
                    item.display_metadata(),
                    context_uri,
                    LockKind::Skip,
                )
                .await;
            self.bus.publish(CardEvent::QueueRowHidden {
                key: item.signature_key().to_string(),
            });
        }

        let result = self.remote.skip_next().await;
        if let Err(e) = &result {
            warn!("Skip next failed: {}", e);
        }
        self.schedule_syncs().await;
        result
    }

    /// Dim the now-playing row, then skip back
    pub async fn on_skip_previous(self: &Arc<Self>) -> CallResult {
        self.bus.publish(CardEvent::NowPlayingDimmed);
        let result = self.remote.skip_previous().await;
        if let Err(e) = &result {
            warn!("Skip previous failed: {}", e);
        }
        self.schedule_syncs().await;
        result
    }

    /// Burst of snapshot reads after a skip, replacing any earlier burst
    async fn schedule_syncs(self: &Arc<Self>) {
        let delays = self.timing.skip_syncs();
        info!("Scheduling {} follow-up syncs", delays.len());

        let mut tasks = self.tasks.lock().await;
        tasks.cancel_all();
        for delay in delays {
            let weak = Arc::downgrade(self);
            tasks.schedule(delay, move || Self::followup(weak, Followup::Sync));
        }
    }

    /// Deferred work; a dropped manager skips it
    async fn followup(manager: Weak<Self>, kind: Followup) {
        let Some(this) = manager.upgrade() else {
            return;
        };
        match kind {
            Followup::Refresh => {
                this.refresh().await;
            }
            Followup::Sync => this.sync().await,
        }
    }

    async fn sync(&self) {
        match self.remote.fetch_snapshot().await {
            Ok(snapshot) => {
                self.reconciler.apply_snapshot(snapshot).await;
            }
            Err(e) => debug!("Follow-up sync failed: {}", e),
        }
        self.refresh().await;
    }

    /// Rows as currently shown
    pub async fn rendered(&self) -> Vec<QueueItem> {
        self.state.lock().await.rendered.clone()
    }

    /// Cancel any scheduled refreshes and syncs
    pub async fn cancel_scheduled(&self) {
        self.tasks.lock().await.cancel_all();
    }
}
