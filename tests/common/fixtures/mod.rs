//! Sample data used across the scenario tests.

use cadence::commands::music::audio_sources::track_metadata::CatalogItem;

/// The channel playback feedback is posted to.
pub const FEEDBACK_CHANNEL: u64 = 301;

/// A ten-item album, in catalog order.
pub fn ten_track_album() -> Vec<CatalogItem> {
    (1..=10)
        .map(|i| CatalogItem {
            title: format!("track{:02}", i),
            artists: vec!["The Fixture Band".to_string()],
            thumbnail: None,
        })
        .collect()
}
