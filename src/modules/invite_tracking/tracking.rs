use super::reconciler::{self, AttributionEvent, MemberJoin};
use super::router::{DeliveryRequest, NotificationRouter};
use super::snapshot::{GuildSnapshot, InviteRecord, InviteSnapshotStore};
use crate::services::config_store::ConfigStore;
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invite fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("platform rejected invite fetch: {0}")]
    Platform(String),
}

/// Anything that can list a guild's live invites.
#[async_trait]
pub trait InviteSource: Send + Sync {
    async fn fetch_invites(&self, guild: serenity::GuildId) -> Result<Vec<InviteRecord>, FetchError>;
}

#[async_trait]
impl InviteSource for serenity::Http {
    async fn fetch_invites(&self, guild: serenity::GuildId) -> Result<Vec<InviteRecord>, FetchError> {
        let invites = self
            .get_guild_invites(guild)
            .await
            .map_err(|e| FetchError::Platform(e.to_string()))?;

        Ok(invites
            .into_iter()
            .map(|invite| InviteRecord {
                code: invite.code,
                uses: invite.uses.into(),
                inviter: invite.inviter.map(|u| u.id),
                guild,
            })
            .collect())
    }
}

/// What a single join produced.
#[derive(Debug, Default)]
pub struct JoinOutcome {
    pub events: Vec<AttributionEvent>,
    pub deliveries: Vec<DeliveryRequest>,
}

pub struct InviteTracker {
    snapshots: InviteSnapshotStore,
    router: NotificationRouter,
    fetch_timeout: Duration,
}

impl InviteTracker {
    pub fn new(config: Arc<dyn ConfigStore>, fetch_timeout: Duration) -> Self {
        Self {
            snapshots: InviteSnapshotStore::new(),
            router: NotificationRouter::new(config),
            fetch_timeout,
        }
    }

    pub fn snapshots(&self) -> &InviteSnapshotStore {
        &self.snapshots
    }

    async fn fetch(
        &self,
        source: &dyn InviteSource,
        guild: serenity::GuildId,
    ) -> Result<Vec<InviteRecord>, FetchError> {
        tokio::time::timeout(self.fetch_timeout, source.fetch_invites(guild))
            .await
            .map_err(|_| FetchError::Timeout(self.fetch_timeout))?
    }

    /// Takes a fresh baseline for a guild (startup, or the bot joining it).
    pub async fn sync_guild(
        &self,
        source: &dyn InviteSource,
        guild: serenity::GuildId,
    ) -> Result<usize, FetchError> {
        let mut lease = self.snapshots.lock(guild).await;
        let invites = self.fetch(source, guild).await?;

        lease.commit(GuildSnapshot::from_invites(guild, &invites));
        info!("Synced {} invites for guild {}", invites.len(), guild);

        Ok(invites.len())
    }

    pub async fn invite_created(&self, guild: serenity::GuildId, code: &str, uses: u64) {
        self.snapshots.record_created(guild, code, uses).await;
    }

    pub async fn invite_deleted(&self, guild: serenity::GuildId, code: &str) {
        if !self.snapshots.record_deleted(guild, code).await {
            debug!("Deleted invite {} was not tracked in guild {}", code, guild);
        }
    }

    pub fn guild_removed(&self, guild: serenity::GuildId) {
        self.snapshots.forget(guild);
    }

    /// Whether the guild has a snapshot taken from a full invite fetch.
    pub async fn has_baseline(&self, guild: serenity::GuildId) -> bool {
        self.snapshots
            .get(guild)
            .await
            .is_some_and(|snapshot| snapshot.is_baselined())
    }

    /// Attributes a join and routes the resulting announcements.
    ///
    /// The guild stays locked from the live fetch until the new baseline is
    /// committed. A failed fetch leaves the snapshot untouched and the join
    /// unattributed.
    pub async fn member_joined(
        &self,
        source: &dyn InviteSource,
        join: MemberJoin,
    ) -> Result<JoinOutcome, FetchError> {
        let result = {
            let mut lease = self.snapshots.lock(join.guild).await;
            let live = self.fetch(source, join.guild).await?;
            let prior = lease.current();

            if !prior.as_ref().is_some_and(GuildSnapshot::is_baselined) {
                warn!(
                    "No invite baseline for guild {}, join of {} left unattributed",
                    join.guild, join.member
                );
            }

            let result = reconciler::reconcile(&join, prior.as_ref(), &live);
            lease.commit(result.snapshot.clone());
            result
        };

        for reset in &result.resets {
            warn!(
                "Invite {} in guild {} went from {} to {} uses without a delete, baseline reset",
                reset.code, join.guild, reset.previous, reset.current
            );
        }

        for code in &result.unattributed {
            debug!("Invite {} in guild {} has no inviter", code, join.guild);
        }

        let mut outcome = JoinOutcome::default();
        for event in result.events {
            info!(
                "Member {} joined guild {} via {} (inviter {}, total {})",
                event.member, event.guild, event.code, event.inviter, event.inviter_total
            );

            match self.router.route(&event).await {
                Ok(Some(request)) => outcome.deliveries.push(request),
                Ok(None) => debug!("No notification channel set for guild {}", event.guild),
                Err(e) => warn!("Skipping notification for guild {}: {}", event.guild, e),
            }

            outcome.events.push(event);
        }

        Ok(outcome)
    }

    /// Total uses of every invite the member created, read live.
    pub async fn invite_count(
        &self,
        source: &dyn InviteSource,
        guild: serenity::GuildId,
        member: serenity::UserId,
    ) -> Result<u64, FetchError> {
        let live = self.fetch(source, guild).await?;
        Ok(reconciler::inviter_total(&live, member))
    }

    pub async fn member_invites(
        &self,
        source: &dyn InviteSource,
        guild: serenity::GuildId,
        member: serenity::UserId,
    ) -> Result<Vec<InviteRecord>, FetchError> {
        let live = self.fetch(source, guild).await?;
        Ok(reconciler::invites_by(&live, member))
    }
}
