use crate::{Data, Error};
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing::{error, info};

/// Entry point for every gateway event the framework hands us.
pub async fn dispatch(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    data: &Data,
) -> Result<(), Error> {
    // 1. Core handling
    match event {
        serenity::FullEvent::Ready { data_about_bot, .. } => {
            info!(
                "Logged in as {} ({} guilds)",
                data_about_bot.user.name,
                data_about_bot.guilds.len()
            );
            let activity = data
                .activity
                .as_ref()
                .map(|name| serenity::ActivityData::playing(name));
            ctx.set_presence(activity, serenity::OnlineStatus::Idle);
        }
        serenity::FullEvent::GuildCreate { guild, is_new, .. } => {
            if is_new.unwrap_or(false) {
                info!("Joined new guild: {} ({})", guild.name, guild.id);
            }
        }
        serenity::FullEvent::GuildDelete { incomplete, .. } => {
            info!("Left guild: {}", incomplete.id);
        }
        _ => {}
    }

    // 2. Module dispatch, one task per handler so a slow module never holds up the others
    let event = Arc::new(event.clone());

    for (module_id, handler) in data.event_handlers.iter().copied() {
        let ctx = ctx.clone();
        let event = event.clone();
        let data = data.clone();

        tokio::spawn(async move {
            if let Err(e) = handler(&ctx, &event, &data).await {
                error!("Error in event handler for module {}: {:?}", module_id, e);
            }
        });
    }

    Ok(())
}
