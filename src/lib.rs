//! Spotify browser card core
//!
//! The state engine behind a Spotify browsing card for Home Assistant:
//! - Reconciler: optimistic predictions merged with pushed entity snapshots
//! - Queue manager: the "up next" list, kept in step with jumps and skips
//! - Playback orchestrator: play dispatch with device recovery
//! - Home Assistant (SpotifyPlus) and Last.fm clients

pub mod adapters;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod favorites;
pub mod orchestrator;
pub mod queue;
pub mod reconciler;
pub mod registry;
