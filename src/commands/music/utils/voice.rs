//! Voice-connection lifecycle policy: reconnection with linear backoff,
//! readiness and recovery windows, and the occupancy grace period.
//!
//! The policy itself is a pure state machine; the `VoiceGateway` seam hides
//! songbird so the session's reactions stay testable.

use std::sync::Arc;
use std::time::Duration;

use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::Songbird;
use songbird::events::context_data::DisconnectReason;
use songbird::model::CloseCode;

use super::session_manager::{MusicError, MusicResult};

/// Rejoins attempted before a dropped connection is declared dead.
pub const MAX_REJOIN_ATTEMPTS: u32 = 5;
/// Linear backoff step between rejoin attempts.
pub const REJOIN_STEP: Duration = Duration::from_secs(5);
/// How long a "removed from channel" drop may auto-recover before teardown.
pub const RECOVERY_WINDOW: Duration = Duration::from_secs(5);
/// How long a joining connection may take to become ready.
pub const READY_TIMEOUT: Duration = Duration::from_secs(20);
/// Grace period before an empty voice channel tears the session down.
pub const EMPTY_CHANNEL_GRACE: Duration = Duration::from_secs(5);

/// What the session should do about a dropped connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectAction {
    /// Platform removed us from the channel: give auto-recovery a short
    /// window, then destroy if it did not happen.
    AwaitRecovery(Duration),
    /// Wait out the backoff, then rejoin.
    Rejoin(Duration),
    /// Retries exhausted; destroy the connection.
    Destroy,
}

/// Reconnection state for one voice connection.
#[derive(Debug, Default)]
pub struct ReconnectPolicy {
    rejoin_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u32 {
        self.rejoin_attempts
    }

    /// Decide how to react to a disconnect. Backoff is linear: 5s, 10s,
    /// 15s, 20s, 25s, then destroy.
    pub fn on_disconnect(&mut self, removed_from_channel: bool) -> DisconnectAction {
        if removed_from_channel {
            return DisconnectAction::AwaitRecovery(RECOVERY_WINDOW);
        }

        if self.rejoin_attempts >= MAX_REJOIN_ATTEMPTS {
            return DisconnectAction::Destroy;
        }

        let delay = REJOIN_STEP * (self.rejoin_attempts + 1);
        self.rejoin_attempts += 1;
        DisconnectAction::Rejoin(delay)
    }
}

/// Whether a songbird disconnect reason means "removed from the channel"
/// (kicked, channel deleted, or the main session dropped).
pub fn is_channel_removal(reason: Option<&DisconnectReason>) -> bool {
    matches!(
        reason,
        Some(DisconnectReason::WsClosed(Some(CloseCode::Disconnected)))
    )
}

/// The session's handle on the voice transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Rejoin a voice channel on the existing gateway session.
    async fn rejoin(&self, channel_id: ChannelId) -> MusicResult<()>;
    /// Whether the driver currently holds a live connection.
    async fn is_connected(&self) -> bool;
    /// Drop the voice connection and driver for this guild.
    async fn leave(&self);
}

/// Production gateway backed by songbird.
pub struct SongbirdGateway {
    songbird: Arc<Songbird>,
    guild_id: GuildId,
}

impl SongbirdGateway {
    pub fn new(songbird: Arc<Songbird>, guild_id: GuildId) -> Self {
        Self { songbird, guild_id }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn rejoin(&self, channel_id: ChannelId) -> MusicResult<()> {
        self.songbird
            .join(self.guild_id, channel_id)
            .await
            .map(|_| ())
            .map_err(|e| MusicError::JoinError(e.to_string()))
    }

    async fn is_connected(&self) -> bool {
        match self.songbird.get(self.guild_id) {
            Some(call) => call.lock().await.current_connection().is_some(),
            None => false,
        }
    }

    async fn leave(&self) {
        let _ = self.songbird.remove(self.guild_id).await;
    }
}
