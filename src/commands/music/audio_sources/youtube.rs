//! Implements the video-platform resolver for YouTube.
//! Uses the `yt-dlp` command-line tool for search and metadata extraction.

use std::process::{Command, Output};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use serenity::async_trait;
use tracing::{debug, info};
use url::Url;

use super::track_metadata::TrackMetadata;
use super::{StreamSearch, flag_if_throttled};
use crate::commands::music::utils::session_manager::{MusicError, MusicResult};

/// YouTube resolver backed by `yt-dlp`.
pub struct YoutubeApi {
    throttled: Arc<AtomicBool>,
}

impl YoutubeApi {
    pub fn new(throttled: Arc<AtomicBool>) -> Self {
        Self { throttled }
    }

    /// Checks if the input string is a YouTube URL (watch page or youtu.be).
    pub fn is_youtube_url(query: &str) -> bool {
        match Url::parse(query) {
            Ok(url) => {
                url.host_str().is_some_and(|host| {
                    host == "www.youtube.com" || host == "youtube.com" || host == "m.youtube.com"
                }) && url.path().starts_with("/watch")
                    || url.host_str() == Some("youtu.be")
            }
            Err(_) => false,
        }
    }

    /// Run `yt-dlp -j --no-playlist <target>` off the async runtime.
    async fn dump_json(&self, target: String) -> MusicResult<Output> {
        let output = tokio::task::spawn_blocking(move || {
            Command::new("yt-dlp")
                .args(["-j", "--no-playlist", &target])
                .output()
        })
        .await
        .map_err(|e| MusicError::AudioSourceError(format!("yt-dlp task failed: {e}")))?
        .map_err(|e| MusicError::AudioSourceError(format!("Failed to run yt-dlp: {e}")))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("HTTP Error 429") {
            if let Some(err) = flag_if_throttled(
                reqwest::StatusCode::TOO_MANY_REQUESTS,
                &self.throttled,
                "YouTube",
            ) {
                return Err(err);
            }
        }

        Ok(output)
    }

    fn parse_metadata(output: &Output) -> Option<TrackMetadata> {
        if !output.status.success() {
            debug!(
                "yt-dlp returned no result: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        let json: serde_json::Value = serde_json::from_str(raw.trim()).ok()?;

        let title = json["title"].as_str().unwrap_or("Unknown Title").to_string();
        let url = json["webpage_url"].as_str().map(|s| s.to_string());
        url.as_ref()?;

        let artists = json["artist"]
            .as_str()
            .or_else(|| json["uploader"].as_str())
            .map(|s| vec![s.to_string()])
            .unwrap_or_default();

        let duration = json["duration"].as_f64().map(Duration::from_secs_f64);
        let thumbnail = json["thumbnail"].as_str().map(|s| s.to_string());

        Some(TrackMetadata {
            title,
            url,
            artists,
            duration,
            thumbnail,
            requested_by: None,
        })
    }
}

#[async_trait]
impl StreamSearch for YoutubeApi {
    /// Fetches metadata for the first search result, `None` when the search
    /// comes back empty.
    async fn search(&self, query: &str) -> MusicResult<Option<TrackMetadata>> {
        info!("Searching YouTube for: {}", query);
        let output = self.dump_json(format!("ytsearch:{query}")).await?;
        Ok(Self::parse_metadata(&output))
    }

    /// Fetches metadata for a direct video URL.
    async fn metadata_for_url(&self, url: &str) -> MusicResult<Option<TrackMetadata>> {
        info!("Fetching YouTube metadata for URL: {}", url);
        let output = self.dump_json(url.to_string()).await?;
        Ok(Self::parse_metadata(&output))
    }
}
