use poise::CreateReply;

use super::*;
use crate::commands::music::utils::embedded_messages;
use crate::commands::music::utils::session_manager::{ListOutcome, MusicError};

/// View the current music queue
#[poise::command(slash_command, category = "Music")]
pub async fn queue(ctx: Context<'_>) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or_else(|| {
        Box::new(MusicError::NotInGuild) as Box<dyn std::error::Error + Send + Sync>
    })?;

    let outcome = ctx.data().registry.list(guild_id).await;

    let reply = match outcome {
        ListOutcome::Queue(view) => {
            CreateReply::default().embed(embedded_messages::music_queue(&view))
        }
        ListOutcome::NoSession => CreateReply::default()
            .embed(embedded_messages::error_embed("No active music session"))
            .ephemeral(true),
    };

    ctx.send(reply).await?;
    Ok(())
}
