//! Implements the Spotify catalog provider.
//! Handles authentication (client credentials flow), URL parsing, and API
//! requests. Spotify never yields a stream directly: single tracks are
//! resolved through the video platform search immediately, collections are
//! returned as deferred groups resolved one search per item.

use std::env;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use regex::Regex;
use reqwest::header;
use serde::{Deserialize, Serialize};
use serenity::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::track_metadata::{CatalogItem, TrackMetadata};
use super::{CatalogProvider, Resolution, StreamSearch};
use crate::commands::music::utils::session_manager::{MusicError, MusicResult};

const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";
const SPOTIFY_AUTH_URL: &str = "https://accounts.spotify.com/api/token";

/// Regex to match and capture Spotify track URLs.
static SPOTIFY_TRACK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(open\.spotify\.com|spotify)/track/([a-zA-Z0-9]+)(\?.*)?$").unwrap()
});

/// Regex to match and capture Spotify playlist URLs.
static SPOTIFY_PLAYLIST_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(open\.spotify\.com|spotify)/playlist/([a-zA-Z0-9]+)(\?.*)?$")
        .unwrap()
});

/// Regex to match and capture Spotify album URLs.
static SPOTIFY_ALBUM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(open\.spotify\.com|spotify)/album/([a-zA-Z0-9]+)(\?.*)?$").unwrap()
});

/// Represents the response from Spotify's token endpoint.
#[derive(Debug, Serialize, Deserialize)]
struct SpotifyToken {
    access_token: String,
    token_type: String,
    expires_in: u64,
    #[serde(skip, default = "Instant::now")]
    created_at: Instant,
}

impl SpotifyToken {
    /// Considers the token expired 30 seconds before its actual expiry time
    /// to provide a buffer.
    fn is_expired(&self) -> bool {
        let expiry = Duration::from_secs(self.expires_in);
        self.created_at.elapsed() > expiry.saturating_sub(Duration::from_secs(30))
    }
}

/// The Spotify Web API client.
pub struct SpotifyApi {
    http: reqwest::Client,
    token: Mutex<Option<SpotifyToken>>,
    api_base: String,
    auth_url: String,
    credentials: Option<(String, String)>,
    throttled: Arc<AtomicBool>,
}

impl SpotifyApi {
    pub fn new(http: reqwest::Client, throttled: Arc<AtomicBool>) -> Self {
        Self {
            http,
            token: Mutex::new(None),
            api_base: SPOTIFY_API_BASE.to_string(),
            auth_url: SPOTIFY_AUTH_URL.to_string(),
            credentials: None,
            throttled,
        }
    }

    /// Client pointed at alternate endpoints with fixed credentials.
    pub fn with_endpoints(
        http: reqwest::Client,
        api_base: impl Into<String>,
        auth_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token: Mutex::new(None),
            api_base: api_base.into(),
            auth_url: auth_url.into(),
            credentials: Some((client_id.into(), client_secret.into())),
            throttled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Checks if the URL matches any known Spotify pattern.
    pub fn is_spotify_url(url: &str) -> bool {
        SPOTIFY_TRACK_REGEX.is_match(url)
            || SPOTIFY_PLAYLIST_REGEX.is_match(url)
            || SPOTIFY_ALBUM_REGEX.is_match(url)
    }

    pub fn extract_track_id(url: &str) -> Option<String> {
        capture_id(&SPOTIFY_TRACK_REGEX, url)
    }

    pub fn extract_playlist_id(url: &str) -> Option<String> {
        capture_id(&SPOTIFY_PLAYLIST_REGEX, url)
    }

    pub fn extract_album_id(url: &str) -> Option<String> {
        capture_id(&SPOTIFY_ALBUM_REGEX, url)
    }

    fn client_credentials(&self) -> MusicResult<(String, String)> {
        if let Some(creds) = &self.credentials {
            return Ok(creds.clone());
        }
        let id = env::var("SPOTIFY_CLIENT_ID")
            .map_err(|_| MusicError::ConfigError("SPOTIFY_CLIENT_ID not set".to_string()))?;
        let secret = env::var("SPOTIFY_CLIENT_SECRET")
            .map_err(|_| MusicError::ConfigError("SPOTIFY_CLIENT_SECRET not set".to_string()))?;
        Ok((id, secret))
    }

    /// Retrieves a valid access token, transparently requesting a new one
    /// via the client credentials flow when the cached token has expired.
    /// A refresh failure fails this call only; the next call retries.
    async fn get_access_token(&self) -> MusicResult<String> {
        let mut token_lock = self.token.lock().await;

        if let Some(token) = &*token_lock {
            if !token.is_expired() {
                return Ok(token.access_token.clone());
            }
            info!("Spotify access token expired, refreshing");
        }

        let (client_id, client_secret) = self.client_credentials()?;
        let auth = BASE64_STANDARD.encode(format!("{client_id}:{client_secret}"));

        let params = [("grant_type", "client_credentials")];
        let response = self
            .http
            .post(&self.auth_url)
            .header(header::AUTHORIZATION, format!("Basic {auth}"))
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                MusicError::ExternalApiError(format!("Failed to request Spotify token: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Cannot read response".to_string());
            warn!("Spotify token refresh failed: {} - {}", status, text);
            return Err(MusicError::ExternalApiError(format!(
                "Spotify API error: {status} - {text}"
            )));
        }

        let token_response = response.json::<SpotifyToken>().await.map_err(|e| {
            MusicError::ExternalApiError(format!("Failed to parse Spotify token: {e}"))
        })?;

        let access_token = token_response.access_token.clone();
        *token_lock = Some(token_response);

        Ok(access_token)
    }

    async fn get_json(&self, url: &str) -> MusicResult<serde_json::Value> {
        let token = self.get_access_token().await?;
        let response = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await
            .map_err(|e| MusicError::ExternalApiError(format!("Spotify request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            if let Some(err) = super::flag_if_throttled(status, &self.throttled, "Spotify") {
                return Err(err);
            }
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Cannot read response".to_string());
            return Err(MusicError::ExternalApiError(format!(
                "Spotify API error: {status} - {text}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| MusicError::ExternalApiError(format!("Failed to parse Spotify data: {e}")))
    }

    /// Fetches a single track as a catalog item.
    async fn get_track(&self, track_id: &str) -> MusicResult<CatalogItem> {
        let data = self
            .get_json(&format!("{}/tracks/{}", self.api_base, track_id))
            .await?;
        item_from_track(&data)
            .ok_or_else(|| MusicError::ExternalApiError("Missing track name".to_string()))
    }

    /// Fetches a playlist's name and full ordered item list (paginated).
    async fn get_playlist(&self, playlist_id: &str) -> MusicResult<(String, Vec<CatalogItem>)> {
        let data = self
            .get_json(&format!("{}/playlists/{}", self.api_base, playlist_id))
            .await?;
        let name = data["name"].as_str().unwrap_or("Spotify playlist").to_string();

        let mut items = Vec::new();
        collect_playlist_page(&data["tracks"], &mut items);

        let mut next = data["tracks"]["next"].as_str().map(|s| s.to_string());
        while let Some(url) = next {
            let page = self.get_json(&url).await?;
            collect_playlist_page(&page, &mut items);
            next = page["next"].as_str().map(|s| s.to_string());
        }

        Ok((name, items))
    }

    /// Fetches an album's name and full ordered item list (paginated).
    async fn get_album(&self, album_id: &str) -> MusicResult<(String, Vec<CatalogItem>)> {
        let data = self
            .get_json(&format!("{}/albums/{}", self.api_base, album_id))
            .await?;
        let name = data["name"].as_str().unwrap_or("Spotify album").to_string();
        let cover = data["images"][0]["url"].as_str().map(|s| s.to_string());

        let mut items = Vec::new();
        collect_album_page(&data["tracks"], cover.as_deref(), &mut items);

        let mut next = data["tracks"]["next"].as_str().map(|s| s.to_string());
        while let Some(url) = next {
            let page = self.get_json(&url).await?;
            collect_album_page(&page, cover.as_deref(), &mut items);
            next = page["next"].as_str().map(|s| s.to_string());
        }

        Ok((name, items))
    }
}

fn capture_id(regex: &Regex, url: &str) -> Option<String> {
    regex
        .captures(url)
        .and_then(|cap| cap.get(3))
        .map(|m| m.as_str().to_string())
}

fn artist_names(value: &serde_json::Value) -> Vec<String> {
    value["artists"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|a| a["name"].as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// A full track object into a catalog item. `None` for items without a
/// Spotify ID (e.g. local files) or a name.
fn item_from_track(track: &serde_json::Value) -> Option<CatalogItem> {
    if track.get("id").is_none_or(|id| id.is_null()) {
        return None;
    }
    let title = track["name"].as_str()?.to_string();
    Some(CatalogItem {
        title,
        artists: artist_names(track),
        thumbnail: track["album"]["images"][0]["url"].as_str().map(|s| s.to_string()),
    })
}

fn collect_playlist_page(page: &serde_json::Value, out: &mut Vec<CatalogItem>) {
    if let Some(entries) = page["items"].as_array() {
        for entry in entries {
            if let Some(item) = item_from_track(&entry["track"]) {
                out.push(item);
            }
        }
    }
}

fn collect_album_page(page: &serde_json::Value, cover: Option<&str>, out: &mut Vec<CatalogItem>) {
    if let Some(entries) = page["items"].as_array() {
        for track in entries {
            if track.get("id").is_none_or(|id| id.is_null()) {
                continue;
            }
            let Some(title) = track["name"].as_str() else {
                continue;
            };
            out.push(CatalogItem {
                title: title.to_string(),
                artists: artist_names(track),
                thumbnail: cover.map(|s| s.to_string()),
            });
        }
    }
}

#[async_trait]
impl CatalogProvider for SpotifyApi {
    fn is_valid_url(&self, url: &str) -> bool {
        SpotifyApi::is_spotify_url(url)
    }

    /// Single tracks resolve their stream right away through the search;
    /// collections come back deferred, with the full item list fetched
    /// eagerly for metadata.
    async fn resolve(&self, url: &str, search: &dyn StreamSearch) -> MusicResult<Resolution> {
        info!("Resolving Spotify URL: {}", url);

        if let Some(track_id) = SpotifyApi::extract_track_id(url) {
            let item = self.get_track(&track_id).await?;
            return match search.search(&item.search_query()).await? {
                Some(resolved) => Ok(Resolution::Tracks(vec![item.overlay(resolved)])),
                None => Ok(Resolution::NoMatches),
            };
        }

        if let Some(playlist_id) = SpotifyApi::extract_playlist_id(url) {
            let (name, items) = self.get_playlist(&playlist_id).await?;
            if items.is_empty() {
                return Ok(Resolution::NoMatches);
            }
            return Ok(Resolution::Collection { name, items });
        }

        if let Some(album_id) = SpotifyApi::extract_album_id(url) {
            let (name, items) = self.get_album(&album_id).await?;
            if items.is_empty() {
                return Ok(Resolution::NoMatches);
            }
            return Ok(Resolution::Collection { name, items });
        }

        Err(MusicError::AudioSourceError("Invalid Spotify URL".to_string()))
    }
}
