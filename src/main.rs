//! Headless runner for the Spotify browser card core.
//!
//! Watches the configured SpotifyPlus entity and logs what the card would
//! render until Ctrl+C or SIGTERM.

use spotify_browser_core::adapters::{
    AdapterHandle, EntityWatcher, HomeAssistantClient, LastFmClient, RemoteControl, RetryConfig,
};
use spotify_browser_core::bus::{self, CardEvent};
use spotify_browser_core::config;
use spotify_browser_core::coordinator::CardCoordinator;
use spotify_browser_core::registry::InstanceRegistry;

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spotify_browser_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting Spotify browser core v{} ({})",
        env!("SBC_VERSION"),
        env!("SBC_GIT_SHA")
    );

    let config = config::load_config()?;
    tracing::info!(
        "Configuration loaded, entity: {}, Home Assistant: {}",
        config.entity_id,
        config.home_assistant.url
    );
    if config.home_assistant.token.is_none() {
        tracing::warn!("No Home Assistant token configured (HA_TOKEN)");
    }

    let bus = bus::create_bus();
    let shutdown = CancellationToken::new();

    let remote: Arc<dyn RemoteControl> = Arc::new(HomeAssistantClient::from_config(&config)?);
    let registry = Arc::new(InstanceRegistry::new());

    let mut card = CardCoordinator::new(&config, remote.clone(), bus.clone(), registry).await;
    if let Some(lastfm) = &config.lastfm {
        card = card.with_lastfm(LastFmClient::new(lastfm)?);
        tracing::info!("Last.fm recommendations enabled");
    }
    let card = Arc::new(card);

    // Log render and feedback events as they are published
    let mut rx = card.subscribe();
    let log_shutdown = shutdown.clone();
    let logger = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = log_shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(CardEvent::SnapshotPushed { .. }) => {}
                    Ok(event) if event.is_feedback_event() => {
                        tracing::warn!("{}: {:?}", event.event_type(), event);
                    }
                    Ok(event) => tracing::info!("{}: {:?}", event.event_type(), event),
                    Err(RecvError::Lagged(n)) => tracing::warn!("Logger lagged {} events", n),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    let card_task = tokio::spawn(card.clone().run(shutdown.clone()));

    let watcher = AdapterHandle::new(
        EntityWatcher::new(remote, config.timing.poll_interval()),
        bus.clone(),
        shutdown.clone(),
    );
    let watcher_task = tokio::spawn(watcher.run_with_retry(RetryConfig::default()));

    card.refresh_queue().await;

    shutdown_signal().await;
    shutdown.cancel();

    for (name, result) in [("watcher", watcher_task.await), ("card", card_task.await)] {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("{} exited with error: {}", name, e),
            Err(e) => tracing::warn!("{} task failed: {}", name, e),
        }
    }
    if let Err(e) = logger.await {
        tracing::warn!("logger task failed: {}", e);
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
