//! Implements the SoundCloud provider. SoundCloud permalinks are directly
//! streamable, so resolution needs no search step: the public `resolve`
//! endpoint maps a shared link onto track metadata.

use std::env;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use serenity::async_trait;
use tracing::info;
use url::Url;

use super::track_metadata::TrackMetadata;
use super::{CatalogProvider, Resolution, StreamSearch, flag_if_throttled};
use crate::commands::music::utils::session_manager::{MusicError, MusicResult};

const SOUNDCLOUD_API_BASE: &str = "https://api-v2.soundcloud.com";

pub struct SoundCloudApi {
    http: reqwest::Client,
    api_base: String,
    client_id: Option<String>,
    throttled: Arc<AtomicBool>,
}

impl SoundCloudApi {
    pub fn new(http: reqwest::Client, throttled: Arc<AtomicBool>) -> Self {
        Self {
            http,
            api_base: SOUNDCLOUD_API_BASE.to_string(),
            client_id: None,
            throttled,
        }
    }

    /// Client pointed at an alternate endpoint with a fixed client id.
    pub fn with_endpoint(
        http: reqwest::Client,
        api_base: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            client_id: Some(client_id.into()),
            throttled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_soundcloud_url(url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) => parsed.host_str().is_some_and(|host| {
                host == "soundcloud.com"
                    || host == "www.soundcloud.com"
                    || host == "on.soundcloud.com"
            }),
            Err(_) => false,
        }
    }

    fn client_id(&self) -> MusicResult<String> {
        if let Some(id) = &self.client_id {
            return Ok(id.clone());
        }
        env::var("SOUNDCLOUD_CLIENT_ID")
            .map_err(|_| MusicError::ConfigError("SOUNDCLOUD_CLIENT_ID not set".to_string()))
    }

    async fn resolve_permalink(&self, url: &str) -> MusicResult<serde_json::Value> {
        let client_id = self.client_id()?;
        let request_url = format!(
            "{}/resolve?url={}&client_id={}",
            self.api_base,
            urlencoded(url),
            client_id
        );

        let response = self.http.get(&request_url).send().await.map_err(|e| {
            MusicError::ExternalApiError(format!("SoundCloud request failed: {e}"))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            if let Some(err) = flag_if_throttled(status, &self.throttled, "SoundCloud") {
                return Err(err);
            }
            return Err(MusicError::ExternalApiError(format!(
                "SoundCloud API error: {status}"
            )));
        }

        response.json().await.map_err(|e| {
            MusicError::ExternalApiError(format!("Failed to parse SoundCloud data: {e}"))
        })
    }
}

/// Percent-encode a URL for use as a query parameter.
fn urlencoded(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

fn track_from_value(value: &serde_json::Value) -> Option<TrackMetadata> {
    let title = value["title"].as_str()?.to_string();
    let permalink = value["permalink_url"].as_str()?.to_string();
    let artist = value["user"]["username"].as_str().map(|s| s.to_string());
    let duration = value["duration"].as_u64().map(Duration::from_millis);
    let artwork = value["artwork_url"].as_str().map(|s| s.to_string());

    Some(TrackMetadata {
        title,
        url: Some(permalink),
        artists: artist.into_iter().collect(),
        duration,
        thumbnail: artwork,
        requested_by: None,
    })
}

#[async_trait]
impl CatalogProvider for SoundCloudApi {
    fn is_valid_url(&self, url: &str) -> bool {
        SoundCloudApi::is_soundcloud_url(url)
    }

    /// Tracks and sets resolve fully here: every permalink is itself the
    /// stream reference, so nothing is deferred.
    async fn resolve(&self, url: &str, _search: &dyn StreamSearch) -> MusicResult<Resolution> {
        info!("Resolving SoundCloud URL: {}", url);
        let data = self.resolve_permalink(url).await?;

        match data["kind"].as_str() {
            Some("track") => match track_from_value(&data) {
                Some(metadata) => Ok(Resolution::Tracks(vec![metadata])),
                None => Ok(Resolution::NoMatches),
            },
            Some("playlist") => {
                let tracks: Vec<TrackMetadata> = data["tracks"]
                    .as_array()
                    .map(|arr| arr.iter().filter_map(track_from_value).collect())
                    .unwrap_or_default();
                if tracks.is_empty() {
                    Ok(Resolution::NoMatches)
                } else {
                    Ok(Resolution::Tracks(tracks))
                }
            }
            _ => Ok(Resolution::NoMatches),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::commands::music::audio_sources::MockStreamSearch;

    #[test]
    fn recognizes_soundcloud_urls() {
        assert!(SoundCloudApi::is_soundcloud_url(
            "https://soundcloud.com/artist/some-track"
        ));
        assert!(SoundCloudApi::is_soundcloud_url("https://on.soundcloud.com/abc"));
        assert!(!SoundCloudApi::is_soundcloud_url(
            "https://open.spotify.com/track/abc"
        ));
    }

    #[test]
    fn percent_encodes_reserved_characters() {
        assert_eq!(
            urlencoded("https://soundcloud.com/a/b"),
            "https%3A%2F%2Fsoundcloud.com%2Fa%2Fb"
        );
    }

    #[tokio::test]
    async fn resolves_track_permalink() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resolve"))
            .and(query_param("client_id", "cid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "track",
                "title": "Night Drive",
                "permalink_url": "https://soundcloud.com/artist/night-drive",
                "user": {"username": "artist"},
                "duration": 180000,
                "artwork_url": "https://img/art.jpg"
            })))
            .mount(&server)
            .await;

        let api = SoundCloudApi::with_endpoint(reqwest::Client::new(), server.uri(), "cid");
        let search = MockStreamSearch::new();
        let resolution = api
            .resolve("https://soundcloud.com/artist/night-drive", &search)
            .await
            .unwrap();

        assert_matches!(resolution, Resolution::Tracks(tracks) => {
            assert_eq!(tracks.len(), 1);
            assert_eq!(tracks[0].title, "Night Drive");
            assert_eq!(
                tracks[0].url.as_deref(),
                Some("https://soundcloud.com/artist/night-drive")
            );
            assert_eq!(tracks[0].duration, Some(Duration::from_secs(180)));
        });
    }

    #[tokio::test]
    async fn unknown_kind_is_no_match() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resolve"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"kind": "user"})))
            .mount(&server)
            .await;

        let api = SoundCloudApi::with_endpoint(reqwest::Client::new(), server.uri(), "cid");
        let search = MockStreamSearch::new();
        let resolution = api
            .resolve("https://soundcloud.com/some-user", &search)
            .await
            .unwrap();
        assert_matches!(resolution, Resolution::NoMatches);
    }
}
