//! Home Assistant REST client for a SpotifyPlus media player
//!
//! Commands go through `POST /api/services/<domain>/<service>`, state reads
//! through `GET /api/states/<entity_id>`. SpotifyPlus services that return
//! data are called with `?return_response`; their payload sits under
//! `service_response.result`.
//!
//! Response bodies are parsed leniently: a missing or oddly shaped field
//! becomes "no data", never an error.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::adapters::traits::{CallResult, RemoteControl, RemoteError};
use crate::bus::{DeviceDescriptor, MediaType, PlaybackSnapshot, PlayerState, QueueItem, QueueSnapshot};
use crate::config::CardConfig;

const SPOTIFYPLUS: &str = "spotifyplus";
const MEDIA_PLAYER: &str = "media_player";

/// Request timeout for every call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct HomeAssistantClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    entity_id: String,
}

impl HomeAssistantClient {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        entity_id: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            entity_id: entity_id.into(),
        })
    }

    pub fn from_config(config: &CardConfig) -> anyhow::Result<Self> {
        Self::new(
            config.home_assistant.url.clone(),
            config.home_assistant.token.clone(),
            config.entity_id.clone(),
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Call a service on the configured entity.
    ///
    /// With `want_response` the unwrapped service response is returned,
    /// otherwise `Value::Null`.
    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        params: Value,
        want_response: bool,
    ) -> Result<Value, RemoteError> {
        let mut url = format!("{}/api/services/{}/{}", self.base_url, domain, service);
        if want_response {
            url.push_str("?return_response");
        }

        let mut body = Map::new();
        body.insert("entity_id".to_string(), json!(self.entity_id));
        if let Value::Object(extra) = params {
            body.extend(extra.into_iter().filter(|(_, v)| !v.is_null()));
        }

        debug!(service = %format!("{}.{}", domain, service), body = ?body, "HA service call");

        let response = self
            .authorize(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let error = http_error(status, &text);
            warn!("{}.{} failed: {}", domain, service, error);
            return Err(error);
        }

        if !want_response {
            return Ok(Value::Null);
        }

        let data: Value = response.json().await.map_err(transport_error)?;
        Ok(unwrap_service_response(data))
    }

    async fn spotifyplus(&self, service: &str, params: Value) -> CallResult {
        self.call_service(SPOTIFYPLUS, service, params, false)
            .await
            .map(|_| ())
    }

    async fn media_player(&self, service: &str, params: Value) -> CallResult {
        self.call_service(MEDIA_PLAYER, service, params, false)
            .await
            .map(|_| ())
    }

    async fn get_state(&self) -> Result<Value, RemoteError> {
        let url = format!("{}/api/states/{}", self.base_url, self.entity_id);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(http_error(status, &text));
        }
        response.json().await.map_err(transport_error)
    }

    /// Relative entity pictures are served by Home Assistant itself
    fn absolute_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            path.to_string()
        }
    }
}

#[async_trait]
impl RemoteControl for HomeAssistantClient {
    async fn play_context(
        &self,
        context_uri: &str,
        device_id: Option<&str>,
        offset_uri: Option<&str>,
    ) -> CallResult {
        self.spotifyplus(
            "player_media_play_context",
            json!({
                "context_uri": context_uri,
                "device_id": device_id,
                "offset_uri": offset_uri,
            }),
        )
        .await
    }

    async fn play_tracks(&self, uris: &[String], device_id: Option<&str>) -> CallResult {
        self.spotifyplus(
            "player_media_play_tracks",
            json!({
                "uris": uris.join(","),
                "device_id": device_id,
            }),
        )
        .await
    }

    async fn play_favorites(&self, device_id: Option<&str>, shuffle: bool) -> CallResult {
        self.spotifyplus(
            "player_media_play_track_favorites",
            json!({
                "device_id": device_id,
                "shuffle": shuffle,
            }),
        )
        .await
    }

    async fn play_media(&self, uri: &str, media_type: MediaType) -> CallResult {
        self.media_player(
            "play_media",
            json!({
                "media_content_id": uri,
                "media_content_type": media_type.as_str(),
            }),
        )
        .await
    }

    async fn toggle_playback(&self, play: bool) -> CallResult {
        let service = if play { "media_play" } else { "media_pause" };
        self.media_player(service, json!({})).await
    }

    async fn skip_next(&self) -> CallResult {
        self.media_player("media_next_track", json!({})).await
    }

    async fn skip_previous(&self) -> CallResult {
        self.media_player("media_previous_track", json!({})).await
    }

    async fn transfer_playback(&self, device_id: &str) -> CallResult {
        if device_id.is_empty() {
            return Err(RemoteError::new("No device ID"));
        }
        self.spotifyplus(
            "player_transfer_playback",
            json!({
                "device_id": device_id,
                "play": true,
            }),
        )
        .await
    }

    async fn set_favorite(&self, track_id: &str, value: bool) -> CallResult {
        let service = if value {
            "save_track_favorites"
        } else {
            "remove_track_favorites"
        };
        self.spotifyplus(service, json!({ "ids": track_id })).await
    }

    async fn add_to_queue(&self, uri: &str) -> CallResult {
        self.spotifyplus("add_player_queue_items", json!({ "uris": uri }))
            .await
    }

    async fn set_volume(&self, level: f32) -> CallResult {
        self.media_player(
            "volume_set",
            json!({ "volume_level": level.clamp(0.0, 1.0) }),
        )
        .await
    }

    async fn list_devices(&self, refresh: bool) -> Result<Vec<DeviceDescriptor>, RemoteError> {
        let result = self
            .call_service(
                SPOTIFYPLUS,
                "get_spotify_connect_devices",
                json!({ "refresh": refresh }),
                true,
            )
            .await?;
        Ok(parse_devices(&result))
    }

    async fn fetch_queue(&self) -> Result<QueueSnapshot, RemoteError> {
        let result = self
            .call_service(SPOTIFYPLUS, "get_player_queue_info", json!({}), true)
            .await?;
        Ok(parse_queue(&result))
    }

    async fn check_favorites(
        &self,
        track_ids: &[String],
    ) -> Result<HashMap<String, bool>, RemoteError> {
        if track_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let result = self
            .call_service(
                SPOTIFYPLUS,
                "check_track_favorites",
                json!({ "ids": track_ids.join(",") }),
                true,
            )
            .await?;
        Ok(parse_favorites(&result))
    }

    async fn fetch_snapshot(&self) -> Result<PlaybackSnapshot, RemoteError> {
        let state = self.get_state().await?;
        let mut snapshot = snapshot_from_state(&state);
        snapshot.image_url = snapshot.image_url.map(|p| self.absolute_url(&p));
        Ok(snapshot)
    }
}

// =============================================================================
// Error mapping
// =============================================================================

fn transport_error(e: reqwest::Error) -> RemoteError {
    match e.status() {
        Some(status) => RemoteError::with_code(status.as_u16(), e.to_string()),
        None => RemoteError::new(e.to_string()),
    }
}

/// Home Assistant reports failures as `{"message": "..."}` or plain text
fn http_error(status: StatusCode, body: &str) -> RemoteError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            let text = body.trim();
            if text.is_empty() {
                status.to_string()
            } else {
                text.to_string()
            }
        });
    RemoteError::with_code(status.as_u16(), message)
}

// =============================================================================
// Response parsing
// =============================================================================

/// `service_response.result`, else `service_response`, else the body itself
fn unwrap_service_response(data: Value) -> Value {
    let response = match data {
        Value::Object(mut map) if map.contains_key("service_response") => map
            .remove("service_response")
            .unwrap_or(Value::Null),
        other => other,
    };
    match response {
        Value::Object(mut map) if map.contains_key("result") => {
            map.remove("result").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// First string found under any of `keys`
fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn array_field<'a>(value: &'a Value, keys: &[&str]) -> &'a [Value] {
    if let Some(items) = value.as_array() {
        return items;
    }
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Build a snapshot from a `/api/states/<entity>` body
pub fn snapshot_from_state(state: &Value) -> PlaybackSnapshot {
    let player_state = state
        .get("state")
        .and_then(Value::as_str)
        .map(PlayerState::from)
        .unwrap_or_default();
    let attrs = state.get("attributes").unwrap_or(&Value::Null);

    PlaybackSnapshot {
        state: player_state,
        track_uri: str_field(attrs, &["media_content_id"]),
        context_uri: str_field(attrs, &["sp_context_uri", "media_context_uri"]),
        is_playing: player_state == PlayerState::Playing,
        device_name: str_field(attrs, &["source"]),
        title: str_field(attrs, &["media_title"]),
        artist: str_field(attrs, &["media_artist"]),
        image_url: str_field(attrs, &["entity_picture"]),
        volume: attrs
            .get("volume_level")
            .and_then(Value::as_f64)
            .map(|v| v as f32),
    }
}

fn parse_queue_item(track: &Value) -> Option<QueueItem> {
    let uri = str_field(track, &["uri"])?;
    let artist = array_field(track, &["artists"])
        .iter()
        .filter_map(|a| str_field(a, &["name"]))
        .collect::<Vec<_>>()
        .join(", ");
    let image_url = track
        .get("album")
        .map(|album| array_field(album, &["images"]))
        .or_else(|| track.get("images").and_then(Value::as_array).map(Vec::as_slice))
        .and_then(|images| images.first())
        .and_then(|image| str_field(image, &["url"]));

    Some(QueueItem {
        id: str_field(track, &["id"]),
        uri,
        title: str_field(track, &["name"]).unwrap_or_default(),
        artist,
        image_url,
        duration_ms: track.get("duration_ms").and_then(Value::as_u64),
    })
}

pub fn parse_queue(result: &Value) -> QueueSnapshot {
    array_field(result, &["queue"])
        .iter()
        .filter_map(parse_queue_item)
        .collect()
}

pub fn parse_devices(result: &Value) -> Vec<DeviceDescriptor> {
    array_field(result, &["Items", "items", "devices"])
        .iter()
        .filter_map(|device| {
            let id = str_field(device, &["Id", "id"])?;
            Some(DeviceDescriptor {
                name: str_field(device, &["Name", "name"]).unwrap_or_else(|| id.clone()),
                device_type: str_field(device, &["Type", "type", "device_type"])
                    .unwrap_or_default(),
                is_active: ["IsActive", "is_active"]
                    .iter()
                    .find_map(|k| device.get(*k).and_then(Value::as_bool))
                    .unwrap_or(false),
                id,
            })
        })
        .collect()
}

pub fn parse_favorites(result: &Value) -> HashMap<String, bool> {
    result
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(id, v)| v.as_bool().map(|b| (id.clone(), b)))
                .collect()
        })
        .unwrap_or_default()
}
