use dashmap::DashMap;
use poise::serenity_prelude as serenity;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

/// An invite as observed on the platform at fetch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteRecord {
    pub code: String,
    pub uses: u64,
    /// Vanity and widget invites have no inviter.
    pub inviter: Option<serenity::UserId>,
    pub guild: serenity::GuildId,
}

/// Last known use count of every invite code in one guild.
///
/// Only a snapshot built from a full invite fetch is a baseline. One assembled
/// from create events alone may be missing codes that already have uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildSnapshot {
    guild: serenity::GuildId,
    uses: BTreeMap<String, u64>,
    baselined: bool,
}

impl GuildSnapshot {
    pub fn new(guild: serenity::GuildId) -> Self {
        Self {
            guild,
            uses: BTreeMap::new(),
            baselined: false,
        }
    }

    /// Builds a snapshot from a live invite list, ignoring invites of other guilds.
    pub fn from_invites(guild: serenity::GuildId, invites: &[InviteRecord]) -> Self {
        let uses = invites
            .iter()
            .filter(|invite| invite.guild == guild)
            .map(|invite| (invite.code.clone(), invite.uses))
            .collect();

        Self {
            guild,
            uses,
            baselined: true,
        }
    }

    pub fn guild(&self) -> serenity::GuildId {
        self.guild
    }

    pub fn is_baselined(&self) -> bool {
        self.baselined
    }

    pub fn uses(&self, code: &str) -> Option<u64> {
        self.uses.get(code).copied()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.uses.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.uses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uses.is_empty()
    }

    fn record(&mut self, code: &str, uses: u64) {
        let entry = self.uses.entry(code.to_string()).or_insert(uses);
        // counts only move forward between reconciliations
        *entry = (*entry).max(uses);
    }

    fn remove(&mut self, code: &str) -> bool {
        self.uses.remove(code).is_some()
    }
}

type Slot = Arc<Mutex<Option<GuildSnapshot>>>;

/// Process-wide invite snapshots, one independently locked slot per guild.
///
/// A slot holding `None` means the guild was never initialized, which the
/// reconciler treats differently from an initialized guild with no invites.
#[derive(Default)]
pub struct InviteSnapshotStore {
    guilds: DashMap<serenity::GuildId, Slot>,
}

/// Exclusive access to one guild's snapshot.
///
/// Holding the lease across "fetch live invites -> reconcile -> commit" keeps two
/// joins in the same guild from diffing against the same baseline.
pub struct GuildLease {
    guild: serenity::GuildId,
    guard: OwnedMutexGuard<Option<GuildSnapshot>>,
}

impl GuildLease {
    pub fn current(&self) -> Option<GuildSnapshot> {
        self.guard.clone()
    }

    /// Stores the snapshot unless it belongs to another guild.
    pub fn commit(&mut self, snapshot: GuildSnapshot) -> bool {
        if snapshot.guild() != self.guild {
            warn!(
                "Refusing to store invites of guild {} under guild {}",
                snapshot.guild(),
                self.guild
            );
            return false;
        }

        *self.guard = Some(snapshot);
        true
    }
}

impl InviteSnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, guild: serenity::GuildId) -> Slot {
        // Clone the Arc out so no shard guard lives across an await.
        self.guilds.entry(guild).or_default().clone()
    }

    pub async fn lock(&self, guild: serenity::GuildId) -> GuildLease {
        GuildLease {
            guild,
            guard: self.slot(guild).lock_owned().await,
        }
    }

    /// Replaces the guild's snapshot with the given invite list.
    pub async fn initialize(&self, guild: serenity::GuildId, invites: &[InviteRecord]) {
        let mut lease = self.lock(guild).await;
        lease.commit(GuildSnapshot::from_invites(guild, invites));
    }

    pub async fn record_created(&self, guild: serenity::GuildId, code: &str, uses: u64) {
        let mut lease = self.lock(guild).await;
        lease
            .guard
            .get_or_insert_with(|| GuildSnapshot::new(guild))
            .record(code, uses);
    }

    /// Removes a code. Returns whether it was tracked.
    pub async fn record_deleted(&self, guild: serenity::GuildId, code: &str) -> bool {
        let Some(slot) = self.guilds.get(&guild).map(|s| s.clone()) else {
            return false;
        };

        let mut snapshot = slot.lock().await;
        snapshot.as_mut().is_some_and(|s| s.remove(code))
    }

    pub async fn get(&self, guild: serenity::GuildId) -> Option<GuildSnapshot> {
        let slot = self.guilds.get(&guild).map(|s| s.clone())?;
        let snapshot = slot.lock().await;
        snapshot.clone()
    }

    pub async fn commit(&self, guild: serenity::GuildId, snapshot: GuildSnapshot) -> bool {
        let mut lease = self.lock(guild).await;
        lease.commit(snapshot)
    }

    /// Drops everything known about a guild the bot has left.
    pub fn forget(&self, guild: serenity::GuildId) {
        self.guilds.remove(&guild);
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn guild() -> serenity::GuildId {
        serenity::GuildId::new(10)
    }

    fn invite(code: &str, uses: u64) -> InviteRecord {
        InviteRecord {
            code: code.to_string(),
            uses,
            inviter: Some(serenity::UserId::new(1)),
            guild: guild(),
        }
    }

    #[tokio::test]
    async fn initialize_replaces_previous_snapshot() {
        let store = InviteSnapshotStore::new();
        store
            .initialize(guild(), &[invite("abc", 5), invite("def", 1)])
            .await;
        store.initialize(guild(), &[invite("xyz", 2)]).await;

        let snapshot = store.get(guild()).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.uses("xyz"), Some(2));
        assert!(!snapshot.contains("abc"));
    }

    #[tokio::test]
    async fn unknown_guild_has_no_snapshot() {
        let store = InviteSnapshotStore::new();
        assert!(store.get(guild()).await.is_none());
        assert!(!store.record_deleted(guild(), "abc").await);
    }

    #[tokio::test]
    async fn record_created_auto_creates_guild() {
        let store = InviteSnapshotStore::new();
        store.record_created(guild(), "abc", 0).await;

        let snapshot = store.get(guild()).await.unwrap();
        assert_eq!(snapshot.uses("abc"), Some(0));
        assert!(!snapshot.is_baselined());
    }

    #[tokio::test]
    async fn initialize_marks_snapshot_as_baseline() {
        let store = InviteSnapshotStore::new();
        store.record_created(guild(), "abc", 0).await;
        store.initialize(guild(), &[invite("abc", 3)]).await;
        store.record_created(guild(), "def", 0).await;

        let snapshot = store.get(guild()).await.unwrap();
        assert!(snapshot.is_baselined());
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn record_created_never_lowers_a_count() {
        let store = InviteSnapshotStore::new();
        store.initialize(guild(), &[invite("abc", 4)]).await;
        store.record_created(guild(), "abc", 0).await;
        assert_eq!(store.get(guild()).await.unwrap().uses("abc"), Some(4));

        store.record_created(guild(), "abc", 7).await;
        assert_eq!(store.get(guild()).await.unwrap().uses("abc"), Some(7));
    }

    #[tokio::test]
    async fn record_deleted_is_noop_for_absent_code() {
        let store = InviteSnapshotStore::new();
        store.initialize(guild(), &[invite("abc", 5)]).await;

        assert!(!store.record_deleted(guild(), "nope").await);
        assert!(store.record_deleted(guild(), "abc").await);
        assert!(store.get(guild()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_is_idempotent() {
        let store = InviteSnapshotStore::new();
        let snapshot = GuildSnapshot::from_invites(guild(), &[invite("abc", 6)]);

        assert!(store.commit(guild(), snapshot.clone()).await);
        assert!(store.commit(guild(), snapshot.clone()).await);

        assert_eq!(store.get(guild()).await, Some(snapshot));
    }

    #[tokio::test]
    async fn commit_rejects_another_guilds_snapshot() {
        let store = InviteSnapshotStore::new();
        store.initialize(guild(), &[invite("abc", 5)]).await;
        let foreign = GuildSnapshot::from_invites(serenity::GuildId::new(20), &[]);

        assert!(!store.commit(guild(), foreign).await);
        assert_eq!(store.get(guild()).await.unwrap().uses("abc"), Some(5));
    }

    #[tokio::test]
    async fn get_returns_a_detached_copy() {
        let store = InviteSnapshotStore::new();
        store.initialize(guild(), &[invite("abc", 5)]).await;

        let before = store.get(guild()).await.unwrap();
        store.record_created(guild(), "new", 0).await;

        assert!(!before.contains("new"));
    }

    #[tokio::test]
    async fn lease_blocks_same_guild_only() {
        let store = Arc::new(InviteSnapshotStore::new());
        let other = serenity::GuildId::new(20);
        let _lease = store.lock(guild()).await;

        // a different guild proceeds while the lease is held
        tokio::time::timeout(Duration::from_secs(1), store.initialize(other, &[]))
            .await
            .expect("other guild must not block");

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), store.get(guild())).await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn forget_drops_guild_state() {
        let store = InviteSnapshotStore::new();
        store.initialize(guild(), &[invite("abc", 5)]).await;
        store.forget(guild());

        assert!(store.get(guild()).await.is_none());
        assert_eq!(store.guild_count(), 0);
    }
}
