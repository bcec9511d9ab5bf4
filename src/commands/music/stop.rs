use poise::CreateReply;
use serenity::all::CreateEmbed;

use super::*;
use crate::commands::music::utils::embedded_messages;
use crate::commands::music::utils::session_manager::{MusicError, StopOutcome};

/// Stop playback and clear the queue
#[poise::command(slash_command, category = "Music")]
pub async fn stop(ctx: Context<'_>) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or_else(|| {
        Box::new(MusicError::NotInGuild) as Box<dyn std::error::Error + Send + Sync>
    })?;

    let outcome = ctx.data().registry.stop(guild_id).await;

    let reply = match outcome {
        StopOutcome::Stopped { removed } => CreateReply::default().embed(
            CreateEmbed::new()
                .title("🛑 Stopped")
                .description(format!(
                    "Stopped playback and removed `{}` track(s) from the queue",
                    removed
                ))
                .color(0x00ff00),
        ),
        StopOutcome::NoSession => CreateReply::default()
            .embed(embedded_messages::error_embed("No active music session"))
            .ephemeral(true),
    };

    ctx.send(reply).await?;
    Ok(())
}
