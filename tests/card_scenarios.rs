//! Card-level scenarios against a recording remote
//!
//! Drives the coordinator the way the presentation layer does and checks the
//! reconciled state, the published events and the remote calls issued.
//! Timed flows run on a paused clock.

mod mock_servers;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use mock_servers::{track, Call, RecordingRemote};
use spotify_browser_core::bus::{
    create_bus, CardEvent, FieldPatch, PlaybackSnapshot, PlayerState, RenderDecision, ViewMode,
};
use spotify_browser_core::config::CardConfig;
use spotify_browser_core::coordinator::CardCoordinator;
use spotify_browser_core::registry::InstanceRegistry;

// =============================================================================
// Test utilities
// =============================================================================

async fn card(remote: Arc<RecordingRemote>) -> Arc<CardCoordinator> {
    let config = CardConfig {
        default_device: Some("Kitchen".to_string()),
        ..CardConfig::default()
    };
    Arc::new(
        CardCoordinator::new(
            &config,
            remote,
            create_bus(),
            Arc::new(InstanceRegistry::new()),
        )
        .await,
    )
}

fn playing(id: &str, title: &str, device: &str) -> PlaybackSnapshot {
    PlaybackSnapshot {
        state: PlayerState::Playing,
        track_uri: Some(format!("spotify:track:{}", id)),
        context_uri: Some("spotify:playlist:p1".to_string()),
        is_playing: true,
        device_name: Some(device.to_string()),
        title: Some(title.to_string()),
        artist: Some(format!("{} Artist", title)),
        image_url: None,
        volume: Some(0.5),
    }
}

/// Everything published so far
fn drain(rx: &mut broadcast::Receiver<CardEvent>) -> Vec<CardEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Highlighted track uri and play state, in publish order
fn highlights(events: &[CardEvent]) -> Vec<(Option<String>, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            CardEvent::HighlightChanged {
                track_uri,
                is_playing,
                ..
            } => Some((track_uri.clone(), *is_playing)),
            _ => None,
        })
        .collect()
}

fn count<F: Fn(&CardEvent) -> bool>(events: &[CardEvent], predicate: F) -> usize {
    events.iter().filter(|e| predicate(e)).count()
}

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn queue_jump_ignores_stale_snapshot_then_adopts_real_one() {
    let remote = Arc::new(RecordingRemote::new());
    remote.set_queue(vec![track("t2", "Second"), track("t3", "Third")]);
    let card = card(remote.clone()).await;

    card.apply_snapshot(playing("t1", "First", "Kitchen")).await;
    assert_eq!(card.queue_rows().await.len(), 2);
    let mut rx = card.subscribe();

    // t = 0: click the row for t2
    let outcome = card.jump_to_queue_item(&track("t2", "Second")).await;
    assert!(outcome.is_success());
    assert_eq!(
        highlights(&drain(&mut rx)).last(),
        Some(&(Some("spotify:track:t2".to_string()), true))
    );
    assert!(remote.commands().contains(&Call::PlayContext {
        context_uri: "spotify:playlist:p1".to_string(),
        device_id: Some("Kitchen".to_string()),
        offset_uri: Some("spotify:track:t2".to_string()),
    }));

    let now = card.now_playing().await.unwrap();
    assert_eq!(now.track_id, "t2");
    assert_eq!(now.title, "Second");
    assert!(now.is_playing);

    // t = 500ms: the entity still reports t1
    sleep(Duration::from_millis(500)).await;
    let transition = card.apply_snapshot(playing("t1", "First", "Kitchen")).await;
    assert!(transition.suppressed);
    assert_eq!(card.now_playing().await.unwrap().track_id, "t2");
    // The row keeps the prediction but highlighting follows the entity
    assert_eq!(
        highlights(&drain(&mut rx)),
        vec![(Some("spotify:track:t1".to_string()), true)]
    );

    // t = 900ms: t2 arrives with fields the prediction could not know
    sleep(Duration::from_millis(400)).await;
    let mut real = playing("t2", "Second", "Living Room");
    real.artist = Some("Real Artist".to_string());
    let transition = card.apply_snapshot(real).await;
    assert!(!transition.suppressed);
    assert_eq!(
        highlights(&drain(&mut rx)),
        vec![(Some("spotify:track:t2".to_string()), true)]
    );

    let now = card.now_playing().await.unwrap();
    assert_eq!(now.track_id, "t2");
    assert_eq!(now.device, "Living Room");
    assert_eq!(now.artist, "Real Artist");

    match transition.render.unwrap() {
        RenderDecision::Patch { patches, .. } => {
            assert!(patches.contains(&FieldPatch::Device("Living Room".to_string())));
            assert!(patches.contains(&FieldPatch::Artist("Real Artist".to_string())));
        }
        other => panic!("expected patch, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn stale_snapshot_is_accepted_after_lock_expires() {
    let remote = Arc::new(RecordingRemote::new());
    let card = card(remote.clone()).await;
    card.apply_snapshot(playing("t1", "First", "Kitchen")).await;

    card.jump_to_queue_item(&track("t2", "Second")).await;

    sleep(Duration::from_millis(3600)).await;
    let transition = card.apply_snapshot(playing("t1", "First", "Kitchen")).await;
    assert!(!transition.suppressed);
    assert_eq!(card.now_playing().await.unwrap().track_id, "t1");
}

// =============================================================================
// Queue
// =============================================================================

#[tokio::test]
async fn identical_queue_renders_once() {
    let remote = Arc::new(RecordingRemote::new());
    remote.set_queue(vec![track("a", "A"), track("b", "B")]);
    let card = card(remote.clone()).await;
    let mut rx = card.subscribe();

    assert!(card.refresh_queue().await);
    assert!(!card.refresh_queue().await);

    let events = drain(&mut rx);
    assert_eq!(
        count(&events, |e| matches!(e, CardEvent::QueueRendered { .. })),
        1
    );
    assert_eq!(remote.count("fetch_queue"), 2);
}

#[tokio::test(start_paused = true)]
async fn jump_zips_out_rows_and_refreshes_later() {
    let remote = Arc::new(RecordingRemote::new());
    remote.set_queue(vec![track("t2", "Second"), track("t3", "Third"), track("t4", "Fourth")]);
    let card = card(remote.clone()).await;
    card.apply_snapshot(playing("t1", "First", "Kitchen")).await;
    let fetches = remote.count("fetch_queue");
    let mut rx = card.subscribe();

    card.jump_to_queue_item(&track("t3", "Third")).await;

    let removed = drain(&mut rx)
        .into_iter()
        .find_map(|e| match e {
            CardEvent::QueueRowsRemoved { rows } => Some(rows),
            _ => None,
        })
        .unwrap();
    let plan: Vec<(String, u64)> = removed.into_iter().map(|r| (r.key, r.delay_ms)).collect();
    assert_eq!(plan, vec![("t2".to_string(), 0), ("t3".to_string(), 30)]);
    assert_eq!(card.queue_rows().await, vec![track("t4", "Fourth")]);

    // The server caught up; the delayed refresh finds nothing to redraw
    remote.set_queue(vec![track("t4", "Fourth")]);
    sleep(Duration::from_millis(1300)).await;

    assert_eq!(remote.count("fetch_queue"), fetches + 1);
    assert_eq!(
        count(&drain(&mut rx), |e| matches!(e, CardEvent::QueueRendered { .. })),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn skip_next_promotes_head_and_syncs() {
    let remote = Arc::new(RecordingRemote::new());
    remote.set_queue(vec![track("t2", "Second"), track("t3", "Third")]);
    let card = card(remote.clone()).await;
    card.apply_snapshot(playing("t1", "First", "Kitchen")).await;
    let mut rx = card.subscribe();

    card.skip_next().await.unwrap();

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, CardEvent::QueueRowHidden { key } if key == "t2")));
    assert_eq!(card.now_playing().await.unwrap().title, "Second");
    assert_eq!(card.queue_rows().await, vec![track("t3", "Third")]);

    // First follow-up sync at 500ms sees the real track
    remote.set_snapshot(playing("t2", "Second", "Office"));
    sleep(Duration::from_millis(600)).await;
    assert_eq!(remote.count("fetch_snapshot"), 1);
    assert_eq!(card.now_playing().await.unwrap().device, "Office");

    sleep(Duration::from_secs(4)).await;
    assert_eq!(remote.count("fetch_snapshot"), 4);
}

#[tokio::test(start_paused = true)]
async fn second_skip_replaces_pending_syncs() {
    let remote = Arc::new(RecordingRemote::new());
    let card = card(remote.clone()).await;
    remote.set_snapshot(playing("t1", "First", "Kitchen"));

    card.skip_next().await.unwrap();
    sleep(Duration::from_millis(100)).await;
    card.skip_next().await.unwrap();
    sleep(Duration::from_secs(5)).await;

    assert_eq!(remote.count("skip_next"), 2);
    assert_eq!(remote.count("fetch_snapshot"), 4);
}

#[tokio::test]
async fn skip_previous_dims_now_playing() {
    let remote = Arc::new(RecordingRemote::new());
    let card = card(remote.clone()).await;
    let mut rx = card.subscribe();

    card.skip_previous().await.unwrap();

    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, CardEvent::NowPlayingDimmed)));
    assert_eq!(remote.commands(), vec![Call::SkipPrevious]);
}

#[tokio::test]
async fn queue_failure_renders_placeholder() {
    let remote = Arc::new(RecordingRemote::new());
    remote.fail_next("fetch_queue", "Service unavailable");
    let card = card(remote.clone()).await;
    let mut rx = card.subscribe();

    assert!(!card.refresh_queue().await);
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        CardEvent::QueueUnavailable { message } if message == "Service unavailable"
    )));
}

#[tokio::test]
async fn add_to_queue_failure_is_a_toast() {
    let remote = Arc::new(RecordingRemote::new());
    remote.fail_next("add_to_queue", "Restriction violated");
    let card = card(remote.clone()).await;
    let mut rx = card.subscribe();

    assert!(card.add_to_queue("spotify:track:x").await.is_err());
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        CardEvent::Toast { message } if message == "Couldn't add to queue"
    )));
}

// =============================================================================
// Favorites
// =============================================================================

#[tokio::test]
async fn failed_favorite_toggle_rolls_back() {
    let remote = Arc::new(RecordingRemote::new());
    remote.fail_next("set_favorite", "timeout");
    let card = card(remote.clone()).await;
    let mut rx = card.subscribe();

    assert!(card.toggle_favorite("t1", false).await.is_err());
    assert!(!card.get_favorite_state("t1").await);

    let events = drain(&mut rx);
    let flags: Vec<bool> = events
        .iter()
        .filter_map(|e| match e {
            CardEvent::FavoriteChanged { value, .. } => Some(*value),
            _ => None,
        })
        .collect();
    assert_eq!(flags, vec![true, false]);
    assert_eq!(count(&events, |e| matches!(e, CardEvent::Toast { .. })), 1);
}

#[tokio::test]
async fn removing_favorite_offers_undo() {
    let remote = Arc::new(RecordingRemote::new());
    let card = card(remote.clone()).await;
    let mut rx = card.subscribe();

    card.toggle_favorite("t1", true).await.unwrap();
    assert!(!card.get_favorite_state("t1").await);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, CardEvent::UndoFavoriteOffered { track_id } if track_id == "t1")));

    card.undo_favorite_removal("t1").await.unwrap();
    assert!(card.get_favorite_state("t1").await);
    assert_eq!(
        remote.commands(),
        vec![
            Call::SetFavorite("t1".to_string(), false),
            Call::SetFavorite("t1".to_string(), true),
        ]
    );
}

#[tokio::test]
async fn verification_lets_remote_win() {
    let remote = Arc::new(RecordingRemote::new());
    remote.set_remote_favorites(HashMap::from([("t1".to_string(), true)]));
    let card = card(remote.clone()).await;
    card.apply_snapshot(playing("t1", "First", "Kitchen")).await;
    assert!(!card.now_playing().await.unwrap().is_favorite);

    let changed = card
        .verify_favorites(&["t1".to_string(), "t2".to_string()])
        .await;

    assert_eq!(changed, 2);
    assert!(card.get_favorite_state("t1").await);
    assert!(!card.get_favorite_state("t2").await);
    assert!(card.now_playing().await.unwrap().is_favorite);

    // Nothing left to disagree about
    assert_eq!(card.verify_favorites(&["t1".to_string()]).await, 0);
}

// =============================================================================
// Playback controls
// =============================================================================

#[tokio::test]
async fn failed_pause_reverts_playing_flag() {
    let remote = Arc::new(RecordingRemote::new());
    remote.fail_next("toggle_playback", "timeout");
    let card = card(remote.clone()).await;
    card.apply_snapshot(playing("t1", "First", "Kitchen")).await;
    let mut rx = card.subscribe();

    assert!(card.toggle_playback().await.is_err());
    assert!(card.now_playing().await.unwrap().is_playing);
    assert_eq!(remote.commands(), vec![Call::TogglePlayback(false)]);
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        CardEvent::Toast { message } if message == "Couldn't pause"
    )));
}

#[tokio::test]
async fn volume_and_view_mode() {
    let remote = Arc::new(RecordingRemote::new());
    let card = card(remote.clone()).await;
    card.apply_snapshot(playing("t1", "First", "Kitchen")).await;
    let mut rx = card.subscribe();

    card.set_volume(0.8).await.unwrap();
    assert!((card.now_playing().await.unwrap().volume - 0.8).abs() < 1e-6);

    card.set_view_mode(ViewMode::VolumeAdjust).await;
    let events = drain(&mut rx);
    let decisions: Vec<bool> = events
        .iter()
        .filter_map(|e| match e {
            CardEvent::NowPlaying { decision } => Some(decision.is_full()),
            _ => None,
        })
        .collect();
    // Volume patches, the view switch renders in full
    assert_eq!(decisions, vec![false, true]);
}

#[tokio::test]
async fn device_list_failure_renders_placeholder() {
    let remote = Arc::new(RecordingRemote::new());
    remote.fail_next("list_devices", "Service unavailable");
    let card = card(remote.clone()).await;
    let mut rx = card.subscribe();

    assert!(card.list_devices().await.is_empty());
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, CardEvent::DevicesUnavailable { .. })));
}

// =============================================================================
// Instances and lifecycle
// =============================================================================

#[tokio::test]
async fn only_active_instance_shows_popups() {
    let registry = Arc::new(InstanceRegistry::new());
    let remote = Arc::new(RecordingRemote::new());
    let config = CardConfig::default();

    let live = CardCoordinator::new(&config, remote.clone(), create_bus(), registry.clone()).await;
    let preview = CardCoordinator::new(&config, remote.clone(), create_bus(), registry.clone()).await;
    let mut preview_rx = preview.subscribe();

    remote.fail_next("transfer_playback", "timeout");
    let _ = preview.transfer_to("dev-1").await;
    assert_eq!(
        count(&drain(&mut preview_rx), |e| e.is_feedback_event()),
        0
    );

    preview.activate().await;
    remote.fail_next("transfer_playback", "timeout");
    let _ = preview.transfer_to("dev-1").await;
    assert_eq!(
        count(&drain(&mut preview_rx), |e| e.is_feedback_event()),
        1
    );
    assert!(!registry.is_active(live.instance_id()).await);
}

#[tokio::test]
async fn run_loop_applies_pushed_snapshots() {
    let remote = Arc::new(RecordingRemote::new());
    let bus = create_bus();
    let card = Arc::new(
        CardCoordinator::new(
            &CardConfig::default(),
            remote,
            bus.clone(),
            Arc::new(InstanceRegistry::new()),
        )
        .await,
    );
    let mut rx = card.subscribe();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(card.clone().run(shutdown.clone()));
    tokio::task::yield_now().await;

    bus.publish(CardEvent::SnapshotPushed {
        snapshot: playing("t1", "First", "Kitchen"),
    });

    let rendered = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(CardEvent::NowPlaying { decision }) = rx.recv().await {
                return decision;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(rendered.state().track_id, "t1");

    shutdown.cancel();
    task.await.unwrap().unwrap();
}
