//! Last.fm similar-artist lookups
//!
//! Results are name-only; ids and uris are resolved later by a search.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::adapters::traits::RemoteError;
use crate::bus::{MediaType, SimilarItem};
use crate::config::LastFmConfig;

#[derive(Debug, Deserialize)]
struct SimilarResponse {
    similarartists: Option<SimilarArtists>,
}

#[derive(Debug, Deserialize)]
struct SimilarArtists {
    #[serde(default)]
    artist: Vec<ArtistEntry>,
}

#[derive(Debug, Deserialize)]
struct ArtistEntry {
    name: String,
}

#[derive(Clone)]
pub struct LastFmClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl LastFmClient {
    pub fn new(config: &LastFmConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
        })
    }

    pub async fn similar_artists(
        &self,
        artist: &str,
        limit: usize,
    ) -> Result<Vec<SimilarItem>, RemoteError> {
        if artist.is_empty() || self.api_key.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}?method=artist.getsimilar&artist={}&api_key={}&format=json&limit={}",
            self.base_url,
            urlencoding::encode(artist),
            urlencoding::encode(&self.api_key),
            limit
        );
        debug!("Last.fm similar artists for {}", artist);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RemoteError::new(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Last.fm request failed: {}", status);
            return Err(RemoteError::with_code(status.as_u16(), status.to_string()));
        }

        let body: SimilarResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::new(format!("unexpected Last.fm response: {}", e)))?;

        Ok(body
            .similarartists
            .map(|s| s.artist)
            .unwrap_or_default()
            .into_iter()
            .map(|a| SimilarItem {
                name: a.name,
                media_type: MediaType::Artist,
                id: None,
                uri: None,
            })
            .collect())
    }
}
