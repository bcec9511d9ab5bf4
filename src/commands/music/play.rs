use std::sync::Arc;

use poise::CreateReply;
use serenity::all::ChannelId;
use tracing::info;

use super::*;
use crate::commands::music::utils::embedded_messages::{self, ChannelNotifier};
use crate::commands::music::utils::session_manager::{MusicError, PlayOutcome};
use crate::utils::database;

/// Play a track from a link (YouTube, Spotify, SoundCloud) or a search query
#[poise::command(slash_command, category = "Music")]
pub async fn play(
    ctx: Context<'_>,
    #[description = "URL or search query"] query: String,
) -> CommandResult {
    info!("Received play command with query: {}", query);
    let guild_id = ctx.guild_id().ok_or_else(|| {
        Box::new(MusicError::NotInGuild) as Box<dyn std::error::Error + Send + Sync>
    })?;

    let settings = database::guild_settings_or_default(guild_id);
    if !settings.enabled {
        ctx.send(
            CreateReply::default()
                .embed(embedded_messages::error_embed(
                    "Music playback is disabled in this server",
                ))
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    }

    // Resolution can take a while; acknowledge first.
    ctx.defer().await?;

    // Playback UI goes to the configured channel when one is bound.
    let feedback_channel = settings
        .channel_id
        .map(ChannelId::new)
        .unwrap_or_else(|| ctx.channel_id());
    let events = Arc::new(ChannelNotifier::new(
        ctx.serenity_context().http.clone(),
        feedback_channel,
    ));

    let outcome = ctx
        .data()
        .registry
        .play(
            ctx.serenity_context(),
            guild_id,
            ctx.author().id,
            ctx.author().name.clone(),
            feedback_channel,
            &query,
            events,
        )
        .await;

    let reply = match outcome {
        PlayOutcome::NowPlaying { track, .. } => {
            CreateReply::default().embed(embedded_messages::now_playing(&track, None))
        }
        PlayOutcome::Queued { track, position } => {
            CreateReply::default().embed(embedded_messages::added_to_queue(&track, position))
        }
        PlayOutcome::CollectionQueued {
            name,
            total,
            started,
        } => CreateReply::default().embed(embedded_messages::collection_queued(
            &name, total, started,
        )),
        PlayOutcome::NoResults { query } => CreateReply::default()
            .embed(embedded_messages::error_embed(format!(
                "No results found for `{}`",
                query
            )))
            .ephemeral(true),
        PlayOutcome::Unsupported => CreateReply::default()
            .embed(embedded_messages::error_embed(
                "That link is not from a supported source",
            ))
            .ephemeral(true),
        PlayOutcome::Disabled => CreateReply::default()
            .embed(embedded_messages::error_embed(
                "Music playback is temporarily disabled, please try again later",
            ))
            .ephemeral(true),
        PlayOutcome::NotInVoiceChannel => CreateReply::default()
            .embed(embedded_messages::error_embed(
                "You need to be in a voice channel",
            ))
            .ephemeral(true),
        PlayOutcome::MissingPermissions => CreateReply::default()
            .embed(embedded_messages::error_embed(
                "I lack permission to join or speak in your voice channel",
            ))
            .ephemeral(true),
        PlayOutcome::JoinFailed { reason } => CreateReply::default().embed(
            embedded_messages::error_embed(format!("Failed to join voice channel: {}", reason)),
        ),
        PlayOutcome::ResolveFailed { reason } => CreateReply::default().embed(
            embedded_messages::error_embed(format!("Failed to process the request: {}", reason)),
        ),
    };

    ctx.send(reply).await?;
    Ok(())
}
