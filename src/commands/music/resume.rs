use poise::CreateReply;

use super::*;
use crate::commands::music::utils::embedded_messages;
use crate::commands::music::utils::session_manager::{MusicError, ResumeOutcome};

/// Resume a paused track
#[poise::command(slash_command, category = "Music")]
pub async fn resume(ctx: Context<'_>) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or_else(|| {
        Box::new(MusicError::NotInGuild) as Box<dyn std::error::Error + Send + Sync>
    })?;

    let outcome = ctx.data().registry.resume(guild_id).await;

    let reply = match outcome {
        ResumeOutcome::Resumed { track } => {
            CreateReply::default().embed(embedded_messages::playback_toggled(&track, true))
        }
        ResumeOutcome::NotPaused => CreateReply::default()
            .embed(embedded_messages::error_embed("No track is paused"))
            .ephemeral(true),
        ResumeOutcome::NoSession => CreateReply::default()
            .embed(embedded_messages::error_embed("No active music session"))
            .ephemeral(true),
    };

    ctx.send(reply).await?;
    Ok(())
}
