use poise::CreateReply;

use super::*;
use crate::commands::music::utils::embedded_messages;
use crate::commands::music::utils::session_manager::{DisconnectOutcome, MusicError};

/// Disconnect from the voice channel and end the session
#[poise::command(slash_command, category = "Music")]
pub async fn disconnect(ctx: Context<'_>) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or_else(|| {
        Box::new(MusicError::NotInGuild) as Box<dyn std::error::Error + Send + Sync>
    })?;

    let outcome = ctx.data().registry.disconnect(guild_id).await;

    let reply = match outcome {
        DisconnectOutcome::Disconnected => {
            CreateReply::default().content("👋 Left the voice channel")
        }
        DisconnectOutcome::NoSession => CreateReply::default()
            .embed(embedded_messages::error_embed("No active music session"))
            .ephemeral(true),
    };

    ctx.send(reply).await?;
    Ok(())
}
