use anyhow::Context as _;
use clap::Parser as _;
use dotenvy::dotenv;
use poise::serenity_prelude as serenity;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

mod db;
mod modules;
mod services;

#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Discord bot token.
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    token: String,

    /// Database holding the notification channel of each guild.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Prefix for text commands.
    #[arg(long, env = "BOT_PREFIX", default_value = "$")]
    prefix: String,

    /// "Playing" status shown next to the bot.
    #[arg(long, env = "BOT_ACTIVITY")]
    activity: Option<String>,

    /// Seconds to wait for the invite list before giving up on a join.
    #[arg(long, env = "INVITE_FETCH_TIMEOUT_SECS", default_value_t = 10)]
    fetch_timeout_secs: u64,

    /// Attribute joins of bot accounts too.
    #[arg(long)]
    track_bots: bool,

    /// Publish commands. If no guild ID is provided, publish globally.
    #[arg(long, num_args = 0..)]
    publish: Option<Vec<u64>>,

    /// Clear all commands instead of publishing them.
    #[arg(long)]
    clear: bool,

    /// Rollback the specified number of migrations and run all migrations again.
    #[arg(long, num_args = 0..=1, default_missing_value = "1")]
    refresh_migrations: Option<u32>,

    /// Import an invites_channel.json mapping into the database, then exit.
    #[arg(long)]
    import_legacy: Option<PathBuf>,
}

// Custom user data passed to all command functions
#[derive(Clone)]
pub struct Data {
    pub config: Arc<dyn services::config_store::ConfigStore>,
    pub tracker: Arc<modules::invite_tracking::tracking::InviteTracker>,
    pub module_definitions: Arc<Vec<modules::ModuleDefinition>>,
    pub event_handlers: Arc<Vec<(&'static str, modules::EventHandler)>>,
    pub prefix: String,
    pub activity: Option<String>,
    pub track_bots: bool,
}

pub type Error = anyhow::Error;
pub type Context<'a> = poise::Context<'a, Data, Error>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting invite tracker...");

    // Establish database connection
    let db = db::establish_connection(&args.database_url)
        .await
        .context("Failed to connect to database")?;

    // Run migrations
    use sea_orm_migration::MigratorTrait;
    if let Some(depth) = args.refresh_migrations {
        info!("Refreshing migrations (down {}, then up)...", depth);
        db::migrations::Migrator::down(&db, Some(depth))
            .await
            .context("Failed to rollback migration")?;
    }

    db::migrations::Migrator::up(&db, None)
        .await
        .context("Failed to run migrations")?;

    if args.refresh_migrations.is_some() {
        info!("Migrations refreshed successfully.");
        return Ok(());
    }

    let config: Arc<dyn services::config_store::ConfigStore> =
        Arc::new(services::config_store::DbConfigStore::new(db.clone()));

    if let Some(path) = &args.import_legacy {
        services::config_store::import_legacy_mapping(&*config, path)
            .await
            .with_context(|| format!("Failed to import {}", path.display()))?;
        return Ok(());
    }

    let commands = modules::commands();

    // Handle command registration if requested
    if let Some(publish_args) = args.publish {
        let http = serenity::Http::new(&args.token);
        let application = http
            .get_current_application_info()
            .await
            .context("Failed to fetch application info")?;
        http.set_application_id(application.id);

        info!("Fetched Application ID: {}", application.id);

        let empty_commands = vec![];
        let commands = if args.clear {
            &empty_commands
        } else {
            &commands
        };

        if publish_args.is_empty() {
            if args.clear {
                info!("Clearing commands globally...");
            } else {
                info!("Registering commands globally...");
            }

            if let Err(e) = poise::builtins::register_globally(&http, commands).await {
                error!("Failed to register commands globally: {}", e);
            } else {
                info!("Global command operation successful");
            }
        } else {
            for guild_id in publish_args {
                if args.clear {
                    info!("Clearing commands in guild {}...", guild_id);
                } else {
                    info!("Registering commands in guild {}...", guild_id);
                }

                if let Err(e) = poise::builtins::register_in_guild(
                    &http,
                    commands,
                    serenity::GuildId::new(guild_id),
                )
                .await
                {
                    error!("Failed to register commands in guild {}: {}", guild_id, e);
                } else {
                    info!("Guild command operation successful for guild {}", guild_id);
                }
            }
        }
        return Ok(());
    }

    let tracker = Arc::new(modules::invite_tracking::tracking::InviteTracker::new(
        config.clone(),
        Duration::from_secs(args.fetch_timeout_secs),
    ));

    let data = Data {
        config,
        tracker,
        module_definitions: Arc::new(modules::definitions()),
        event_handlers: Arc::new(modules::event_handlers()),
        prefix: args.prefix.clone(),
        activity: args.activity,
        track_bots: args.track_bots,
    };

    let framework_options = poise::FrameworkOptions {
        commands,
        prefix_options: poise::PrefixFrameworkOptions {
            prefix: Some(args.prefix),
            ..Default::default()
        },
        event_handler: |ctx, event, _framework, data| {
            Box::pin(services::event_manager::dispatch(ctx, event, data))
        },
        ..Default::default()
    };

    let framework = poise::Framework::builder()
        .options(framework_options)
        .setup(move |_ctx, ready, _framework| {
            info!(
                "Framework ready for {} with {} modules",
                ready.user.name,
                data.module_definitions.len()
            );
            Box::pin(async move { Ok(data) })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::GUILD_INVITES
        | serenity::GatewayIntents::GUILD_MEMBERS
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT;

    let mut client = serenity::ClientBuilder::new(&args.token, intents)
        .framework(framework)
        .await
        .context("Failed to create client")?;

    info!("Bot is ready!");
    client.start_autosharded().await.context("Client error")?;

    Ok(())
}
