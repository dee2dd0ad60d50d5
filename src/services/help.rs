use crate::modules::ModuleDefinition;
use crate::{Context, Data, Error};
use poise::serenity_prelude as serenity;

/// List every available command
#[poise::command(slash_command, prefix_command)]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    let data = ctx.data();
    let description = render_help(
        &data.module_definitions,
        &ctx.framework().options().commands,
        &data.prefix,
    );

    let embed = serenity::CreateEmbed::new()
        .title("Bot Commands")
        .description(description)
        .colour(serenity::Colour::DARK_GREEN)
        .footer(serenity::CreateEmbedFooter::new(format!(
            "Requested by {}",
            ctx.author().name
        )));

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

pub fn render_help(
    modules: &[ModuleDefinition],
    commands: &[poise::Command<Data, Error>],
    prefix: &str,
) -> String {
    let mut slash = vec![];
    let mut prefixed = vec![];

    for command in commands {
        let description = command.description.as_deref().unwrap_or("");
        if command.slash_action.is_some() {
            slash.push(format!("`/{}` - {}", command.name, description));
        } else if command.prefix_action.is_some() {
            prefixed.push(format!("`{}{}` - {}", prefix, command.name, description));
        }
    }

    let mut out = String::new();
    for module in modules {
        out.push_str(&format!("**{}**: {}\n\n", module.name, module.description));
    }
    if !slash.is_empty() {
        out.push_str("**Slash Commands**\n");
        out.push_str(&slash.join("\n"));
        out.push('\n');
    }
    if !prefixed.is_empty() {
        out.push_str("**Prefix Commands**\n");
        out.push_str(&prefixed.join("\n"));
    }
    out
}
