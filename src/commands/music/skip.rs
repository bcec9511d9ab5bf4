use poise::CreateReply;
use serenity::all::CreateEmbed;

use super::*;
use crate::commands::music::utils::embedded_messages;
use crate::commands::music::utils::session_manager::{MusicError, SkipOutcome};

/// Skip the current track, optionally several at once
#[poise::command(slash_command, category = "Music")]
pub async fn skip(
    ctx: Context<'_>,
    #[description = "Number of tracks to skip"]
    #[min = 1]
    count: Option<u32>,
) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or_else(|| {
        Box::new(MusicError::NotInGuild) as Box<dyn std::error::Error + Send + Sync>
    })?;

    let outcome = ctx
        .data()
        .registry
        .skip(guild_id, count.unwrap_or(1) as usize)
        .await;

    let reply = match outcome {
        SkipOutcome::Skipped { count } => CreateReply::default().embed(
            CreateEmbed::new()
                .title("⏭️ Skipped")
                .description(format!("Skipped `{}` track(s)", count))
                .color(0x00ff00),
        ),
        SkipOutcome::NothingPlaying => CreateReply::default()
            .embed(embedded_messages::error_embed("No track is currently playing"))
            .ephemeral(true),
        SkipOutcome::NoSession => CreateReply::default()
            .embed(embedded_messages::error_embed("No active music session"))
            .ephemeral(true),
    };

    ctx.send(reply).await?;
    Ok(())
}
