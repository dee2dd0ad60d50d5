use crate::{Context, Error};
use poise::serenity_prelude as serenity;

/// Set the channel for invite tracking
#[poise::command(
    slash_command,
    guild_only,
    rename = "set-invites-channel",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn set_invites_channel(
    ctx: Context<'_>,
    #[description = "Channel that receives invite announcements"]
    #[channel_types("Text", "News")]
    channel: serenity::GuildChannel,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or_else(|| anyhow::anyhow!("Not in a guild"))?;

    if let Err(e) = ctx.data().config.set(guild_id, channel.id).await {
        tracing::error!("Failed to set invite channel for guild {}: {}", guild_id, e);
        ctx.send(
            poise::CreateReply::default()
                .content("Could not save the invite tracking channel, please try again later.")
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    }

    tracing::info!("Invite channel for guild {} set to {}", guild_id, channel.id);
    ctx.say(format!("Invite tracking channel set to <#{}>!", channel.id))
        .await?;

    Ok(())
}

/// Reset the invite tracking channel
#[poise::command(
    slash_command,
    guild_only,
    rename = "reset-invites-channel",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn reset_invites_channel(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or_else(|| anyhow::anyhow!("Not in a guild"))?;

    let response = match ctx.data().config.remove(guild_id).await {
        Ok(true) => {
            tracing::info!("Invite channel for guild {} reset", guild_id);
            "Invite tracking channel has been reset!"
        }
        Ok(false) => "No invite tracking channel is set.",
        Err(e) => {
            tracing::error!("Failed to reset invite channel for guild {}: {}", guild_id, e);
            "Could not reset the invite tracking channel, please try again later."
        }
    };

    ctx.say(response).await?;
    Ok(())
}

/// Check how many members a user has invited
#[poise::command(slash_command, guild_only)]
pub async fn invites(
    ctx: Context<'_>,
    #[description = "Member to check (defaults to you)"] member: Option<serenity::User>,
) -> Result<(), Error> {
    let target = member.as_ref().unwrap_or_else(|| ctx.author());

    let Some(total) = count_invites(ctx, target.id).await? else {
        return Ok(());
    };

    ctx.say(format!("<@{}> has invited {} members!", target.id, total))
        .await?;
    Ok(())
}

/// Check how many invites a user has
#[poise::command(prefix_command, guild_only)]
pub async fn i(
    ctx: Context<'_>,
    #[description = "Member to check (defaults to you)"] member: Option<serenity::User>,
) -> Result<(), Error> {
    let target = member.as_ref().unwrap_or_else(|| ctx.author());

    let Some(total) = count_invites(ctx, target.id).await? else {
        return Ok(());
    };

    let response = if target.id == ctx.author().id {
        format!("<@{}>, you have **__{}__** invites!", target.id, total)
    } else {
        format!("<@{}> has **__{}__** invites!", target.id, total)
    };

    ctx.say(response).await?;
    Ok(())
}

/// Display the invite links a user created and how often each was used
#[poise::command(slash_command, guild_only)]
pub async fn invited(
    ctx: Context<'_>,
    #[description = "Member to check (defaults to you)"] member: Option<serenity::User>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or_else(|| anyhow::anyhow!("Not in a guild"))?;
    let target = member.as_ref().unwrap_or_else(|| ctx.author());

    let invites = match ctx
        .data()
        .tracker
        .member_invites(&*ctx.serenity_context().http, guild_id, target.id)
        .await
    {
        Ok(invites) => invites,
        Err(e) => {
            reply_fetch_failure(ctx, e).await?;
            return Ok(());
        }
    };

    let description = if invites.is_empty() {
        "No active invites yet.".to_string()
    } else {
        let mut lines = vec![];
        for invite in &invites {
            lines.push(format!("`{}` - {} uses", invite.code, invite.uses));
        }
        format!("Active invites:\n{}", lines.join("\n"))
    };

    let embed = serenity::CreateEmbed::new()
        .title(format!("{}'s Invites", target.name))
        .description(description)
        .colour(serenity::Colour::BLUE)
        .footer(serenity::CreateEmbedFooter::new(format!(
            "Requested by {}",
            ctx.author().name
        )));

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Live invite total for a member, or `None` when the fetch failed and the
/// caller has already been told.
async fn count_invites(
    ctx: Context<'_>,
    member: serenity::UserId,
) -> Result<Option<u64>, Error> {
    let guild_id = ctx.guild_id().ok_or_else(|| anyhow::anyhow!("Not in a guild"))?;

    match ctx
        .data()
        .tracker
        .invite_count(&*ctx.serenity_context().http, guild_id, member)
        .await
    {
        Ok(total) => Ok(Some(total)),
        Err(e) => {
            reply_fetch_failure(ctx, e).await?;
            Ok(None)
        }
    }
}

async fn reply_fetch_failure(
    ctx: Context<'_>,
    e: crate::modules::invite_tracking::tracking::FetchError,
) -> Result<(), Error> {
    tracing::error!("Failed to fetch invites for command: {}", e);
    ctx.send(
        poise::CreateReply::default()
            .content("Failed to fetch invites, please try again later.")
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

pub fn commands() -> Vec<poise::Command<crate::Data, Error>> {
    vec![
        set_invites_channel(),
        reset_invites_channel(),
        invites(),
        invited(),
        i(),
    ]
}
