use crate::db::entities::notification_channels;
use async_trait::async_trait;
use chrono::Utc;
use poise::serenity_prelude as serenity;
use sea_orm::{sea_query::OnConflict, DatabaseConnection, EntityTrait, Set};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reads failed. Callers suppress the notification and carry on.
    #[error("notification config unavailable: {0}")]
    Unavailable(String),
    /// Writes failed. Reported back to whoever issued the command.
    #[error("failed to persist notification config: {0}")]
    Write(String),
}

/// Durable guild -> notification channel mapping.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, guild: serenity::GuildId)
        -> Result<Option<serenity::ChannelId>, ConfigError>;

    async fn set(
        &self,
        guild: serenity::GuildId,
        channel: serenity::ChannelId,
    ) -> Result<(), ConfigError>;

    /// Returns whether an entry existed.
    async fn remove(&self, guild: serenity::GuildId) -> Result<bool, ConfigError>;
}

pub struct DbConfigStore {
    db: DatabaseConnection,
}

impl DbConfigStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConfigStore for DbConfigStore {
    async fn get(
        &self,
        guild: serenity::GuildId,
    ) -> Result<Option<serenity::ChannelId>, ConfigError> {
        let entry = notification_channels::Entity::find_by_id(guild.get() as i64)
            .one(&self.db)
            .await
            .map_err(|e| ConfigError::Unavailable(e.to_string()))?;

        Ok(entry.map(|e| serenity::ChannelId::new(e.channel_id as u64)))
    }

    async fn set(
        &self,
        guild: serenity::GuildId,
        channel: serenity::ChannelId,
    ) -> Result<(), ConfigError> {
        let entry = notification_channels::ActiveModel {
            guild_id: Set(guild.get() as i64),
            channel_id: Set(channel.get() as i64),
            updated_at: Set(Utc::now().into()),
        };

        notification_channels::Entity::insert(entry)
            .on_conflict(
                OnConflict::column(notification_channels::Column::GuildId)
                    .update_columns([
                        notification_channels::Column::ChannelId,
                        notification_channels::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await
            .map_err(|e| ConfigError::Write(e.to_string()))?;

        Ok(())
    }

    async fn remove(&self, guild: serenity::GuildId) -> Result<bool, ConfigError> {
        let result = notification_channels::Entity::delete_by_id(guild.get() as i64)
            .exec(&self.db)
            .await
            .map_err(|e| ConfigError::Write(e.to_string()))?;

        Ok(result.rows_affected > 0)
    }
}

/// Imports an `invites_channel.json` file (`{"<guild id>": "<channel id>"}`).
///
/// Entries whose ids don't parse are skipped with a warning. Returns the number
/// of imported entries.
pub async fn import_legacy_mapping(
    store: &dyn ConfigStore,
    path: &Path,
) -> Result<usize, crate::Error> {
    let raw = tokio::fs::read_to_string(path).await?;
    let mapping: HashMap<String, String> = serde_json::from_str(&raw)?;

    let mut imported = 0;
    for (guild, channel) in mapping {
        let (Some(guild_id), Some(channel_id)) = (parse_id(&guild), parse_id(&channel)) else {
            warn!("Skipping malformed legacy entry {} -> {}", guild, channel);
            continue;
        };

        store
            .set(
                serenity::GuildId::new(guild_id),
                serenity::ChannelId::new(channel_id),
            )
            .await?;
        imported += 1;
    }

    info!("Imported {} legacy notification channels", imported);
    Ok(imported)
}

fn parse_id(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|id| *id != 0)
}
