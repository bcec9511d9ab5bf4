//! Defines `TrackMetadata`, the unified representation of track information
//! from every audio source, and `Track`, the playable unit handed to the
//! session queue.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serenity::async_trait;
use songbird::input::{Input, YoutubeDl};

use crate::commands::music::utils::session_manager::{MusicError, MusicResult};

/// Unified metadata for a playable track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackMetadata {
    /// The title of the track.
    pub title: String,
    /// The canonical page URL the stream is created from, if resolved.
    pub url: Option<String>,
    /// Artist names, in catalog order.
    pub artists: Vec<String>,
    /// The duration of the track, if known.
    #[serde(with = "humantime_serde")]
    pub duration: Option<Duration>,
    /// URL to artwork for the track, if available.
    pub thumbnail: Option<String>,
    /// The name of the user who requested the track.
    pub requested_by: Option<String>,
}

impl Default for TrackMetadata {
    fn default() -> Self {
        Self {
            title: "Unknown Track".to_string(),
            url: None,
            artists: Vec::new(),
            duration: None,
            thumbnail: None,
            requested_by: None,
        }
    }
}

impl TrackMetadata {
    /// Artist list rendered as a single display string.
    pub fn artist_line(&self) -> String {
        if self.artists.is_empty() {
            "Unknown Artist".to_string()
        } else {
            self.artists.join(", ")
        }
    }
}

/// One item of a catalog collection (album or playlist) whose stream has not
/// been resolved yet. Carries the catalog metadata that overrides whatever
/// the stream search finds.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub title: String,
    pub artists: Vec<String>,
    pub thumbnail: Option<String>,
}

impl CatalogItem {
    /// The search term used to resolve this item against the video platform.
    pub fn search_query(&self) -> String {
        if self.artists.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.artists.join(" "))
        }
    }

    /// Attach this item's catalog metadata onto a resolved stream reference.
    pub fn overlay(&self, mut resolved: TrackMetadata) -> TrackMetadata {
        resolved.title = self.title.clone();
        resolved.artists = self.artists.clone();
        if self.thumbnail.is_some() {
            resolved.thumbnail = self.thumbnail.clone();
        }
        resolved
    }
}

/// Lifecycle notifications fired as a track moves through the player.
///
/// Implementations render UI feedback; the session does not know how. The
/// interface is injected at `Track` construction.
#[async_trait]
pub trait TrackEvents: Send + Sync {
    async fn on_play(&self, track: &TrackMetadata, up_next: Option<&TrackMetadata>);
    async fn on_pause(&self, track: &TrackMetadata, resumed: bool);
    async fn on_finish(&self, track: &TrackMetadata);
    async fn on_error(&self, track: &TrackMetadata, error: &MusicError);
}

/// A no-op `TrackEvents` sink, for callers with nowhere to post feedback.
pub struct SilentEvents;

#[async_trait]
impl TrackEvents for SilentEvents {
    async fn on_play(&self, _track: &TrackMetadata, _up_next: Option<&TrackMetadata>) {}
    async fn on_pause(&self, _track: &TrackMetadata, _resumed: bool) {}
    async fn on_finish(&self, _track: &TrackMetadata) {}
    async fn on_error(&self, _track: &TrackMetadata, _error: &MusicError) {}
}

/// One playable unit: resolved metadata plus its lifecycle notifier.
#[derive(Clone)]
pub struct Track {
    pub metadata: TrackMetadata,
    pub events: Arc<dyn TrackEvents>,
}

impl Track {
    pub fn new(metadata: TrackMetadata, events: Arc<dyn TrackEvents>) -> Self {
        Self { metadata, events }
    }

    /// Build the streamable input for this track.
    ///
    /// Fails when the stream reference is missing (lazy resolution never
    /// completed); the caller is responsible for advancing past the failed
    /// track — queue state must not be corrupted by the error.
    pub fn create_audio_resource(&self, http: &reqwest::Client) -> MusicResult<Input> {
        let url = self.metadata.url.as_ref().ok_or_else(|| {
            MusicError::AudioSourceError(format!(
                "Track '{}' has no resolved stream URL",
                self.metadata.title
            ))
        })?;

        Ok(YoutubeDl::new(http.clone(), url.clone()).into())
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}
