//! Track descriptor resolution: classifies a raw user query and maps it to
//! playable track descriptors via the catalog providers and the video
//! platform search.

/// Submodule implementing the Spotify catalog provider.
pub mod spotify;
/// Submodule implementing the SoundCloud provider.
pub mod soundcloud;
/// Submodule defining `TrackMetadata` and `Track`.
pub mod track_metadata;
/// Submodule implementing the YouTube search/stream resolver.
pub mod youtube;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serenity::async_trait;
use tracing::{info, warn};
use url::Url;

use crate::commands::music::utils::session_manager::{MusicError, MusicResult};
use soundcloud::SoundCloudApi;
use spotify::SpotifyApi;
use track_metadata::{CatalogItem, TrackMetadata};
use youtube::YoutubeApi;

/// The primary video platform: free-text search plus direct-link metadata.
///
/// Each call resolves at most one stream reference; `Ok(None)` means "no
/// match", which is never fatal to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamSearch: Send + Sync {
    async fn search(&self, query: &str) -> MusicResult<Option<TrackMetadata>>;
    async fn metadata_for_url(&self, url: &str) -> MusicResult<Option<TrackMetadata>>;
}

/// A catalog search backend reachable through a link (Spotify, SoundCloud).
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Whether this provider recognizes the URL.
    fn is_valid_url(&self, url: &str) -> bool;

    /// Resolve the URL into tracks or a deferred collection. The stream
    /// search is passed in for providers that only carry catalog metadata.
    async fn resolve(&self, url: &str, search: &dyn StreamSearch) -> MusicResult<Resolution>;
}

/// Outcome of resolving one user query.
#[derive(Debug)]
pub enum Resolution {
    /// Fully-resolved tracks, ready to play in order.
    Tracks(Vec<TrackMetadata>),
    /// A catalog collection. Item metadata is complete; each item's stream
    /// is resolved lazily, one search per item, when the group is loaded.
    Collection { name: String, items: Vec<CatalogItem> },
    /// The query produced no results.
    NoMatches,
    /// URL-shaped input that no provider understands.
    Unsupported,
}

/// A utility struct providing general helpers for query classification.
pub struct AudioSource;

impl AudioSource {
    /// Whether the input is URL-shaped (http/https). Does not validate that
    /// the URL is reachable or supported by any provider.
    pub fn is_url(input: &str) -> bool {
        Url::parse(input)
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false)
    }
}

/// Translates user queries into playable track descriptors.
///
/// Classification order: known catalog link, video platform link, any other
/// URL (unsupported, fails fast), free text (treated as a search).
pub struct Resolver {
    youtube: Arc<dyn StreamSearch>,
    catalogs: Vec<Arc<dyn CatalogProvider>>,
    throttled: Arc<AtomicBool>,
}

impl Resolver {
    /// Build the production resolver: Spotify and SoundCloud catalogs over a
    /// YouTube stream search. `throttled` is the shared sticky flag flipped
    /// when an external dependency reports sustained rate-limiting.
    pub fn new(http: reqwest::Client, throttled: Arc<AtomicBool>) -> Self {
        Self {
            youtube: Arc::new(YoutubeApi::new(throttled.clone())),
            catalogs: vec![
                Arc::new(SpotifyApi::new(http.clone(), throttled.clone())),
                Arc::new(SoundCloudApi::new(http, throttled.clone())),
            ],
            throttled,
        }
    }

    /// Assemble a resolver from explicit parts.
    pub fn with_sources(
        youtube: Arc<dyn StreamSearch>,
        catalogs: Vec<Arc<dyn CatalogProvider>>,
        throttled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            youtube,
            catalogs,
            throttled,
        }
    }

    /// The stream search used for lazy per-item resolution of collections.
    pub fn stream_search(&self) -> Arc<dyn StreamSearch> {
        self.youtube.clone()
    }

    /// Whether the resolve path has been disabled by sustained throttling.
    pub fn is_throttled(&self) -> bool {
        self.throttled.load(Ordering::Relaxed)
    }

    /// Resolve a raw user query into track descriptors, stamping the
    /// requester onto everything produced.
    pub async fn resolve(&self, query: &str, requested_by: &str) -> MusicResult<Resolution> {
        let resolution = self.classify_and_resolve(query).await?;
        Ok(stamp_requester(resolution, requested_by))
    }

    async fn classify_and_resolve(&self, query: &str) -> MusicResult<Resolution> {
        if AudioSource::is_url(query) {
            // Catalog links take priority over the raw video platform.
            for catalog in &self.catalogs {
                if catalog.is_valid_url(query) {
                    return catalog.resolve(query, self.youtube.as_ref()).await;
                }
            }

            if YoutubeApi::is_youtube_url(query) {
                return match self.youtube.metadata_for_url(query).await? {
                    Some(metadata) => Ok(Resolution::Tracks(vec![metadata])),
                    None => Ok(Resolution::NoMatches),
                };
            }

            warn!("Unable to resolve URL to a known provider: {}", query);
            return Ok(Resolution::Unsupported);
        }

        info!("Searching for query: {}", query);
        match self.youtube.search(query).await? {
            Some(metadata) => Ok(Resolution::Tracks(vec![metadata])),
            None => Ok(Resolution::NoMatches),
        }
    }
}

fn stamp_requester(resolution: Resolution, requested_by: &str) -> Resolution {
    match resolution {
        Resolution::Tracks(mut tracks) => {
            for track in &mut tracks {
                track.requested_by = Some(requested_by.to_string());
            }
            Resolution::Tracks(tracks)
        }
        other => other,
    }
}

/// Shared helper: map an HTTP 429 onto the sticky throttle flag and a
/// resolver failure for this call only.
pub(crate) fn flag_if_throttled(
    status: reqwest::StatusCode,
    throttled: &AtomicBool,
    source: &str,
) -> Option<MusicError> {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        warn!("{} reported sustained rate-limiting; disabling playback", source);
        throttled.store(true, Ordering::Relaxed);
        return Some(MusicError::ExternalApiError(format!(
            "{source} is rate-limiting requests"
        )));
    }
    None
}
