//! Songbird event glue: track-boundary and driver-lifecycle notifiers that
//! feed the session state machine.

use std::sync::Weak;

use serenity::async_trait;
use songbird::{Event, EventContext};
use tracing::{debug, warn};

use super::session_manager::Session;
use super::voice::is_channel_removal;

/// Fired when the current track finishes (naturally or via stop); delivers
/// the Idle transition that pulls the next track.
pub struct TrackEndNotifier {
    pub session: Weak<Session>,
}

#[async_trait]
impl songbird::EventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let Some(session) = self.session.upgrade() else {
            return Some(Event::Cancel);
        };
        if let EventContext::Track(_) = ctx {
            debug!("Track ended for guild {}", session.guild_id());
            session.handle_track_end().await;
        }
        None
    }
}

/// Fired when a track fails at runtime; reports the error and advances.
pub struct TrackErrorNotifier {
    pub session: Weak<Session>,
    pub title: String,
}

#[async_trait]
impl songbird::EventHandler for TrackErrorNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let Some(session) = self.session.upgrade() else {
            return Some(Event::Cancel);
        };
        if let EventContext::Track(_) = ctx {
            warn!(
                "Track '{}' errored for guild {}",
                self.title,
                session.guild_id()
            );
            session
                .handle_track_error(format!("Playback of '{}' failed", self.title))
                .await;
        }
        None
    }
}

/// Global driver event: the voice connection dropped. Routes the platform
/// close reason into the reconnect policy.
pub struct DriverDisconnectNotifier {
    pub session: Weak<Session>,
}

#[async_trait]
impl songbird::EventHandler for DriverDisconnectNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let Some(session) = self.session.upgrade() else {
            return Some(Event::Cancel);
        };
        if let EventContext::DriverDisconnect(data) = ctx {
            let removed = is_channel_removal(data.reason.as_ref());
            warn!(
                "Voice driver disconnected for guild {} (removed from channel: {})",
                session.guild_id(),
                removed
            );
            session.on_driver_disconnect(removed).await;
        }
        None
    }
}
