use super::reconciler::AttributionEvent;
use crate::services::config_store::{ConfigError, ConfigStore};
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// A rendered announcement ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    pub destination: serenity::ChannelId,
    pub content: String,
}

pub struct NotificationRouter {
    config: Arc<dyn ConfigStore>,
}

impl NotificationRouter {
    pub fn new(config: Arc<dyn ConfigStore>) -> Self {
        Self { config }
    }

    /// Resolves the guild's announcement channel. `None` when the guild has none.
    pub async fn route(
        &self,
        event: &AttributionEvent,
    ) -> Result<Option<DeliveryRequest>, ConfigError> {
        let Some(destination) = self.config.get(event.guild).await? else {
            return Ok(None);
        };

        Ok(Some(DeliveryRequest {
            destination,
            content: render(event),
        }))
    }
}

pub fn render(event: &AttributionEvent) -> String {
    format!(
        "➕ <@{}> has been invited by <@{}> and has now **__{}__** invites!",
        event.member, event.inviter, event.inviter_total
    )
}
