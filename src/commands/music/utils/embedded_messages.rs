//! Embed builders for playback feedback, plus the production `TrackEvents`
//! implementation that posts them to the session's bound text channel.

use std::sync::Arc;

use serenity::all::{ChannelId, CreateEmbed, CreateMessage};
use serenity::async_trait;
use serenity::http::Http;
use tracing::{debug, warn};

use super::format_duration;
use super::session_manager::{MusicError, QueueView};
use crate::commands::music::audio_sources::track_metadata::{TrackEvents, TrackMetadata};

/// Parse the metadata for the now playing and added to queue embeds
fn parse_metadata(metadata: &TrackMetadata) -> (String, String, String) {
    let title = metadata.title.clone();
    let url = metadata.url.clone().unwrap_or_else(|| "#".to_string());
    let duration_str = metadata
        .duration
        .map(format_duration)
        .unwrap_or_else(|| "Unknown duration".to_string());

    (title, url, duration_str)
}

/// Create an embed for when a song starts playing
pub fn now_playing(metadata: &TrackMetadata, up_next: Option<&TrackMetadata>) -> CreateEmbed {
    let (title, url, duration_str) = parse_metadata(metadata);

    let mut embed = CreateEmbed::new()
        .title("🎵 Now Playing")
        .description(format!("[{}]({})", title, url))
        .field("Artist", metadata.artist_line(), true)
        .field("Duration", format!("`{}`", duration_str), true)
        .color(0x00ff00);

    if let Some(requested_by) = &metadata.requested_by {
        embed = embed.field("Requested by", requested_by.clone(), true);
    }
    if let Some(next) = up_next {
        embed = embed.field("Up next", next.title.clone(), false);
    }
    if let Some(thumbnail) = &metadata.thumbnail {
        embed = embed.thumbnail(thumbnail.clone());
    }

    embed
}

/// Create an embed for when a song is added to the queue
pub fn added_to_queue(metadata: &TrackMetadata, position: usize) -> CreateEmbed {
    let (title, url, duration_str) = parse_metadata(metadata);

    let mut embed = CreateEmbed::new()
        .title("🎵 Added to Queue")
        .description(format!("[{}]({})", title, url))
        .field("Duration", format!("`{}`", duration_str), true)
        .field("Position", format!("`#{}`", position), true)
        .color(0x00ff00);

    if let Some(thumbnail) = &metadata.thumbnail {
        embed = embed.thumbnail(thumbnail.clone());
    }

    embed
}

/// Create an embed for a queued collection (album or playlist)
pub fn collection_queued(name: &str, total: usize, started: bool) -> CreateEmbed {
    let note = if started {
        "Starting playback now"
    } else {
        "Added behind the current queue"
    };
    CreateEmbed::new()
        .title("🎵 Collection Queued")
        .description(format!("**{}** — {} tracks\n{}", name, total, note))
        .color(0x00ff00)
}

/// Create an embed for a paused or resumed track
pub fn playback_toggled(metadata: &TrackMetadata, resumed: bool) -> CreateEmbed {
    let (title, url, _) = parse_metadata(metadata);
    let (icon, verb) = if resumed {
        ("▶️", "Resumed")
    } else {
        ("⏸️", "Paused")
    };
    CreateEmbed::new()
        .title(format!("{} {}", icon, verb))
        .description(format!("{} [{}]({})", verb, title, url))
        .color(0x00ff00)
}

/// Create an embed for a skipped-due-to-error notice
pub fn track_error(metadata: &TrackMetadata, error: &MusicError) -> CreateEmbed {
    CreateEmbed::new()
        .title("⚠️ Track Skipped")
        .description(format!(
            "Could not play **{}**: {}\nMoving on to the next track.",
            metadata.title, error
        ))
        .color(0xffaa00)
}

/// Create an embed for the music queue
pub fn music_queue(view: &QueueView) -> CreateEmbed {
    let mut description = String::new();

    if let Some((metadata, _state)) = &view.current {
        description.push_str("**🎵 Now Playing**\n");
        description.push_str(&format!(
            "**[{}]({})** — {}\n\n",
            metadata.title,
            metadata.url.as_deref().unwrap_or("#"),
            metadata.artist_line(),
        ));
    } else {
        description.push_str("**🔇 Nothing playing**\n\n");
    }

    if view.upcoming.is_empty() {
        description.push_str("**📭 Queue is empty**");
    } else {
        description.push_str(&format!("**📋 Queue - {} tracks**\n", view.upcoming.len()));
        for (index, track) in view.upcoming.iter().take(10).enumerate() {
            description.push_str(&format!(
                "`{}.` [{}]({})\n",
                index + 1,
                track.title,
                track.url.as_deref().unwrap_or("#"),
            ));
        }
        if view.upcoming.len() > 10 {
            description.push_str(&format!("… and {} more\n", view.upcoming.len() - 10));
        }
    }

    CreateEmbed::new()
        .title("🎵 Music Queue")
        .description(description)
        .color(0x00ff00)
}

/// Create a generic error embed
pub fn error_embed(message: impl Into<String>) -> CreateEmbed {
    CreateEmbed::new()
        .title("❌ Error")
        .description(message.into())
        .color(0xff0000)
}

/// Posts track lifecycle feedback to the channel a request was made from.
pub struct ChannelNotifier {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelNotifier {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }

    async fn send(&self, embed: CreateEmbed) {
        let message = CreateMessage::new().embed(embed);
        if let Err(e) = self.channel_id.send_message(self.http.clone(), message).await {
            warn!(
                "Failed to post playback feedback to channel {}: {}",
                self.channel_id, e
            );
        }
    }
}

#[async_trait]
impl TrackEvents for ChannelNotifier {
    async fn on_play(&self, track: &TrackMetadata, up_next: Option<&TrackMetadata>) {
        self.send(now_playing(track, up_next)).await;
    }

    async fn on_pause(&self, track: &TrackMetadata, resumed: bool) {
        self.send(playback_toggled(track, resumed)).await;
    }

    async fn on_finish(&self, track: &TrackMetadata) {
        // End-of-track needs no message of its own; the next on_play (or
        // silence) tells the story.
        debug!("Finished playing: {}", track.title);
    }

    async fn on_error(&self, track: &TrackMetadata, error: &MusicError) {
        self.send(track_error(track, error)).await;
    }
}
