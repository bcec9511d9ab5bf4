use poise::CreateReply;

use super::*;
use crate::commands::music::utils::embedded_messages;
use crate::commands::music::utils::session_manager::{MusicError, PauseOutcome};

/// Pause the current track
#[poise::command(slash_command, category = "Music")]
pub async fn pause(ctx: Context<'_>) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or_else(|| {
        Box::new(MusicError::NotInGuild) as Box<dyn std::error::Error + Send + Sync>
    })?;

    let outcome = ctx.data().registry.pause(guild_id).await;

    let reply = match outcome {
        PauseOutcome::Paused { track } => {
            CreateReply::default().embed(embedded_messages::playback_toggled(&track, false))
        }
        PauseOutcome::AlreadyPaused => CreateReply::default()
            .embed(embedded_messages::error_embed("The track is already paused"))
            .ephemeral(true),
        PauseOutcome::NothingPlaying => CreateReply::default()
            .embed(embedded_messages::error_embed("No track is currently playing"))
            .ephemeral(true),
        PauseOutcome::NoSession => CreateReply::default()
            .embed(embedded_messages::error_embed("No active music session"))
            .ephemeral(true),
    };

    ctx.send(reply).await?;
    Ok(())
}
