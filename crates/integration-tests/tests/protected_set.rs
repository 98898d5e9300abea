//! The engine's cached protected list against concurrent admin changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bn_core::{
    ConfigStore, GuildConfig, GuildId, MockAvatarCache, MockImageFetcher, MockMemberDirectory,
    MockMessenger, MockModerator, Result, UserId,
};
use bn_db_sqlite::SqliteConfigStore;
use bn_engine::{Engine, EngineOptions, Ports};
use integration_tests::GUILD;
use tokio::sync::Notify;

/// Delegates to SQLite, but holds the first `protected_users` call after its
/// read until released.
struct PausingStore {
    inner: SqliteConfigStore,
    armed: AtomicBool,
    paused: Notify,
    resume: Notify,
}

#[async_trait]
impl ConfigStore for PausingStore {
    async fn get_config(&self, guild_id: GuildId) -> Result<Option<GuildConfig>> {
        self.inner.get_config(guild_id).await
    }
    async fn add_guild(&self, guild_id: GuildId) -> Result<()> {
        self.inner.add_guild(guild_id).await
    }
    async fn remove_guild(&self, guild_id: GuildId) -> Result<()> {
        self.inner.remove_guild(guild_id).await
    }
    async fn configured_guilds(&self) -> Result<Vec<GuildId>> {
        self.inner.configured_guilds().await
    }
    async fn set_enabled(&self, guild_id: GuildId, enabled: bool) -> Result<bool> {
        self.inner.set_enabled(guild_id, enabled).await
    }
    async fn set_username_thresholds(&self, guild_id: GuildId, soft: u32, hard: u32) -> Result<bool> {
        self.inner.set_username_thresholds(guild_id, soft, hard).await
    }
    async fn set_avatar_thresholds(&self, guild_id: GuildId, soft: f64, hard: f64) -> Result<bool> {
        self.inner.set_avatar_thresholds(guild_id, soft, hard).await
    }
    async fn set_require_both(&self, guild_id: GuildId, require_both: bool) -> Result<bool> {
        self.inner.set_require_both(guild_id, require_both).await
    }
    async fn protected_users(&self, guild_id: GuildId) -> Result<Vec<UserId>> {
        let users = self.inner.protected_users(guild_id).await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.paused.notify_one();
            self.resume.notified().await;
        }
        Ok(users)
    }
    async fn all_protected_users(&self) -> Result<Vec<UserId>> {
        self.inner.all_protected_users().await
    }
    async fn add_protected_user(&self, guild_id: GuildId, user_id: UserId) -> Result<bool> {
        self.inner.add_protected_user(guild_id, user_id).await
    }
    async fn remove_protected_user(&self, guild_id: GuildId, user_id: UserId) -> Result<bool> {
        self.inner.remove_protected_user(guild_id, user_id).await
    }
}

#[tokio::test]
async fn protect_during_a_list_load_is_not_lost() {
    let store = Arc::new(PausingStore {
        inner: SqliteConfigStore::new("sqlite::memory:").await.unwrap(),
        armed: AtomicBool::new(true),
        paused: Notify::new(),
        resume: Notify::new(),
    });
    store.add_guild(GUILD).await.unwrap();

    let mut directory = MockMemberDirectory::new();
    directory.expect_avatar_url().returning(|_| Ok(None));
    let mut cache = MockAvatarCache::new();
    cache.expect_remove().returning(|_| Ok(()));

    let engine = Arc::new(Engine::new(
        Ports {
            config: store.clone(),
            directory: Arc::new(directory),
            moderator: Arc::new(MockModerator::new()),
            messenger: Arc::new(MockMessenger::new()),
            cache: Arc::new(cache),
            fetcher: Arc::new(MockImageFetcher::new()),
        },
        EngineOptions::default(),
    ));

    // A reader loads the empty list and stalls before caching it.
    let reader = tokio::spawn({
        let engine = engine.clone();
        async move { engine.protected_users(GUILD).await }
    });
    store.paused.notified().await;

    assert!(engine.protect(GUILD, UserId(10)).await.unwrap());
    store.resume.notify_one();
    let stale = reader.await.unwrap().unwrap();
    assert!(stale.is_empty());

    assert_eq!(store.protected_users(GUILD).await.unwrap(), vec![UserId(10)]);
    assert_eq!(*engine.protected_users(GUILD).await.unwrap(), vec![UserId(10)]);
}
