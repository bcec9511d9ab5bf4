//! Gateway event handling: watches voice-state updates so sessions whose
//! channel empties out are torn down after a grace period.

use serenity::all::FullEvent;
use serenity::client::Context;
use serenity::model::id::{ChannelId, GuildId};
use serenity::model::voice::VoiceState;

use crate::{Data, Error};

pub async fn handle_event(
    ctx: &Context,
    event: &FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let FullEvent::VoiceStateUpdate { old, new } = event {
        handle_voice_state_update(ctx, data, old.as_ref(), new).await;
    }
    Ok(())
}

/// Occupancy watchdog: when the session's voice channel is left with zero
/// non-bot members, schedule a grace-period recheck before teardown. The
/// grace window absorbs the bot's own channel-move events.
async fn handle_voice_state_update(
    ctx: &Context,
    data: &Data,
    old: Option<&VoiceState>,
    new: &VoiceState,
) {
    let Some(guild_id) = new.guild_id.or_else(|| old.and_then(|o| o.guild_id)) else {
        return;
    };
    let Some(session) = data.registry.get(guild_id) else {
        return;
    };
    if session.is_destroyed() {
        return;
    }

    let channel_id = session.voice_channel();
    if non_bot_members(ctx, guild_id, channel_id) == 0 {
        let ctx = ctx.clone();
        session.schedule_empty_check(move || async move {
            non_bot_members(&ctx, guild_id, channel_id)
        });
    }
}

/// Count the non-bot members currently in a voice channel, from the cache.
fn non_bot_members(ctx: &Context, guild_id: GuildId, channel_id: ChannelId) -> usize {
    let bot_id = ctx.cache.current_user().id;
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return 0;
    };

    guild
        .voice_states
        .values()
        .filter(|state| state.channel_id == Some(channel_id))
        .filter(|state| {
            match state.member.as_ref() {
                Some(member) => !member.user.bot,
                // No cached member: assume human unless it is us.
                None => state.user_id != bot_id,
            }
        })
        .count()
}
