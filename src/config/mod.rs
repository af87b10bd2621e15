//! Configuration management

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR_NAME: &str = "spotify-browser-core";

#[derive(Debug, Clone, Deserialize)]
pub struct CardConfig {
    /// SpotifyPlus media player entity
    #[serde(default = "default_entity_id")]
    pub entity_id: String,

    /// Device used when no session is active (id or name)
    #[serde(default)]
    pub default_device: Option<String>,

    #[serde(default)]
    pub home_assistant: HomeAssistantConfig,

    #[serde(default)]
    pub lastfm: Option<LastFmConfig>,

    #[serde(default)]
    pub timing: TimingConfig,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            entity_id: default_entity_id(),
            default_device: None,
            home_assistant: HomeAssistantConfig::default(),
            lastfm: None,
            timing: TimingConfig::default(),
        }
    }
}

fn default_entity_id() -> String {
    "media_player.spotifyplus".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HomeAssistantConfig {
    #[serde(default = "default_ha_url")]
    pub url: String,
    /// Long-lived access token
    pub token: Option<String>,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            url: default_ha_url(),
            token: None,
        }
    }
}

fn default_ha_url() -> String {
    "http://localhost:8123".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LastFmConfig {
    pub api_key: String,
    #[serde(default = "default_lastfm_url")]
    pub base_url: String,
}

fn default_lastfm_url() -> String {
    "https://ws.audioscrobbler.com/2.0/".to_string()
}

/// Lock windows, animation staggers and sync delays, in milliseconds
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "default_click_lock_ms")]
    pub click_lock_ms: u64,
    #[serde(default = "default_skip_lock_ms")]
    pub skip_lock_ms: u64,
    #[serde(default = "default_row_stagger_ms")]
    pub row_stagger_ms: u64,
    #[serde(default = "default_jump_refresh_ms")]
    pub jump_refresh_ms: u64,
    #[serde(default = "default_skip_sync_ms")]
    pub skip_sync_ms: Vec<u64>,
    #[serde(default = "default_device_wake_ms")]
    pub device_wake_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            click_lock_ms: default_click_lock_ms(),
            skip_lock_ms: default_skip_lock_ms(),
            row_stagger_ms: default_row_stagger_ms(),
            jump_refresh_ms: default_jump_refresh_ms(),
            skip_sync_ms: default_skip_sync_ms(),
            device_wake_ms: default_device_wake_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TimingConfig {
    pub fn click_lock(&self) -> Duration {
        Duration::from_millis(self.click_lock_ms)
    }

    pub fn skip_lock(&self) -> Duration {
        Duration::from_millis(self.skip_lock_ms)
    }

    pub fn jump_refresh(&self) -> Duration {
        Duration::from_millis(self.jump_refresh_ms)
    }

    pub fn skip_syncs(&self) -> Vec<Duration> {
        self.skip_sync_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    pub fn device_wake(&self) -> Duration {
        Duration::from_millis(self.device_wake_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_click_lock_ms() -> u64 {
    3500
}

fn default_skip_lock_ms() -> u64 {
    3000
}

fn default_row_stagger_ms() -> u64 {
    30
}

fn default_jump_refresh_ms() -> u64 {
    1200
}

fn default_skip_sync_ms() -> Vec<u64> {
    vec![500, 1500, 2500, 4000]
}

fn default_device_wake_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Get config directory (SBC_CONFIG_DIR, XDG_CONFIG_HOME or platform default)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SBC_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library/Application Support")
                .join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config").join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join(APP_DIR_NAME);
        }
    }

    PathBuf::from(".")
}

pub fn load_config() -> Result<CardConfig> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // SBC_ENTITY_ID, SBC_HOME_ASSISTANT__URL, SBC_TIMING__CLICK_LOCK_MS, ...
        .add_source(
            ::config::Environment::with_prefix("SBC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    // HA_URL / HA_TOKEN are what the add-on environment provides
    if let Ok(url) = std::env::var("HA_URL") {
        builder = builder.set_override("home_assistant.url", url)?;
    }
    if let Ok(token) = std::env::var("HA_TOKEN") {
        builder = builder.set_override("home_assistant.token", token)?;
    }

    let config = builder.build()?;

    Ok(config.try_deserialize()?)
}
