use crate::modules::invite_tracking::reconciler::MemberJoin;
use crate::modules::invite_tracking::router::DeliveryRequest;
use crate::{Data, Error};
use poise::serenity_prelude as serenity;

pub fn handler<'a>(
    ctx: &'a serenity::Context,
    event: &'a serenity::FullEvent,
    data: &'a Data,
) -> poise::BoxFuture<'a, Result<(), Error>> {
    Box::pin(async move { handle_event(ctx, event, data).await })
}

async fn handle_event(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Ready { data_about_bot, .. } => {
            let guilds: Vec<_> = data_about_bot.guilds.iter().map(|g| g.id).collect();
            sync_guilds(ctx, &guilds, data).await;
        }
        serenity::FullEvent::GuildCreate { guild, is_new, .. } => {
            // Guilds present at startup are covered by Ready. A guild back
            // from an outage without a baseline is synced again.
            if is_new.unwrap_or(false) || !data.tracker.has_baseline(guild.id).await {
                sync_guilds(ctx, &[guild.id], data).await;
            }
        }
        serenity::FullEvent::GuildDelete { incomplete, .. } => {
            if let Some(guild_id) = left_guild(incomplete) {
                data.tracker.guild_removed(guild_id);
            } else {
                tracing::warn!("Guild {} became unavailable", incomplete.id);
            }
        }
        serenity::FullEvent::InviteCreate { data: invite, .. } => {
            let Some(guild_id) = invite.guild_id else {
                tracing::warn!("Invite {} created without guild_id", invite.code);
                return Ok(());
            };

            tracing::debug!("Invite created: {} in guild {}", invite.code, guild_id);
            data.tracker
                .invite_created(guild_id, &invite.code, invite.uses.into())
                .await;
        }
        serenity::FullEvent::InviteDelete { data: invite, .. } => {
            let Some(guild_id) = invite.guild_id else {
                tracing::warn!("Invite {} deleted without guild_id", invite.code);
                return Ok(());
            };

            tracing::debug!("Invite deleted: {} in guild {}", invite.code, guild_id);
            data.tracker.invite_deleted(guild_id, &invite.code).await;
        }
        serenity::FullEvent::GuildMemberAddition { new_member, .. } => {
            handle_member_join(ctx, new_member, data).await?;
        }
        _ => {}
    }

    Ok(())
}

/// The guild the bot was removed from, or `None` when the guild is only
/// unavailable because of an outage.
fn left_guild(incomplete: &serenity::UnavailableGuild) -> Option<serenity::GuildId> {
    (!incomplete.unavailable).then_some(incomplete.id)
}

async fn sync_guilds(ctx: &serenity::Context, guilds: &[serenity::GuildId], data: &Data) {
    for guild_id in guilds {
        if let Err(e) = data.tracker.sync_guild(&*ctx.http, *guild_id).await {
            tracing::error!("Failed to sync invites for guild {}: {}", guild_id, e);
        }
    }
}

async fn handle_member_join(
    ctx: &serenity::Context,
    member: &serenity::Member,
    data: &Data,
) -> Result<(), Error> {
    if member.user.bot && !data.track_bots {
        return Ok(());
    }

    tracing::info!("Member joined: {} in guild {}", member.user.id, member.guild_id);

    let join = MemberJoin {
        guild: member.guild_id,
        member: member.user.id,
        invite_code: None,
    };

    let outcome = match data.tracker.member_joined(&*ctx.http, join).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(
                "Invite attribution for {} in guild {} lost: {}",
                member.user.id,
                member.guild_id,
                e
            );
            return Ok(());
        }
    };

    for request in outcome.deliveries {
        if let Err(e) = deliver(ctx, &request).await {
            tracing::error!(
                "Failed to announce invite in channel {}: {:?}",
                request.destination,
                e
            );
        }
    }

    Ok(())
}

async fn deliver(ctx: &serenity::Context, request: &DeliveryRequest) -> Result<(), Error> {
    let message = serenity::CreateMessage::new()
        .content(&request.content)
        .allowed_mentions(serenity::CreateAllowedMentions::new());

    request.destination.send_message(ctx, message).await?;
    Ok(())
}
