//! Startup sequencing and routing of platform events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bn_core::{GuildId, Member, Result, SweepReport};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::engine::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Initializing,
    Ready,
}

/// Events are only handled once the startup sequence has finished.
#[derive(Debug, Default)]
pub struct Lifecycle {
    ready: AtomicBool,
}

impl Lifecycle {
    pub fn state(&self) -> LifecycleState {
        if self.ready.load(Ordering::Acquire) {
            LifecycleState::Ready
        } else {
            LifecycleState::Initializing
        }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }
}

/// A platform event forwarded by the gateway relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    MemberAdd { member: Member },
    MemberUpdate { old: Member, new: Member },
    GuildCreate { guild_id: GuildId },
    GuildDelete {
        guild_id: GuildId,
        #[serde(default = "available_by_default")]
        available: bool,
    },
}

fn available_by_default() -> bool {
    true
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::MemberAdd { .. } => "member_add",
            InboundEvent::MemberUpdate { .. } => "member_update",
            InboundEvent::GuildCreate { .. } => "guild_create",
            InboundEvent::GuildDelete { .. } => "guild_delete",
        }
    }
}

pub struct EventDispatcher {
    engine: Arc<Engine>,
    lifecycle: Lifecycle,
}

impl EventDispatcher {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine, lifecycle: Lifecycle::default() }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn accepts(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    /// Repairs configuration, rebuilds the avatar cache, starts accepting
    /// events, then sweeps every community. A failing step is logged and the
    /// sequence moves on.
    pub async fn start(&self) -> Vec<SweepReport> {
        if let Err(err) = self.engine.repair_config().await {
            error!(error = %err, "failed to repair community config");
        }
        if let Err(err) = self.engine.rebuild_avatar_cache().await {
            error!(error = %err, "failed to rebuild avatar cache");
        }

        self.lifecycle.mark_ready();
        info!("ready, now accepting events");

        match self.engine.sweep_all().await {
            Ok(reports) => reports,
            Err(err) => {
                error!(error = %err, "initial sweep failed");
                Vec::new()
            }
        }
    }

    /// Routes one event to the engine. Returns `false` when the event was
    /// dropped because startup has not finished.
    pub async fn dispatch(&self, event: InboundEvent) -> Result<bool> {
        if !self.accepts() {
            debug!(event = event.name(), "dropping event received during startup");
            return Ok(false);
        }

        match event {
            InboundEvent::MemberAdd { member } => {
                self.engine.on_member_add(&member).await?;
            }
            InboundEvent::MemberUpdate { old, new } => {
                self.engine.on_member_update(&old, &new).await?;
            }
            InboundEvent::GuildCreate { guild_id } => self.engine.on_guild_create(guild_id).await?,
            InboundEvent::GuildDelete { guild_id, available } => {
                self.engine.on_guild_delete(guild_id, available).await?
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineOptions, Ports};
    use bn_core::{
        MockAvatarCache, MockConfigStore, MockImageFetcher, MockMemberDirectory, MockMessenger,
        MockModerator, UserId,
    };
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn engine(config: MockConfigStore, directory: MockMemberDirectory, cache: MockAvatarCache) -> Arc<Engine> {
        Arc::new(Engine::new(
            Ports {
                config: Arc::new(config),
                directory: Arc::new(directory),
                moderator: Arc::new(MockModerator::new()),
                messenger: Arc::new(MockMessenger::new()),
                cache: Arc::new(cache),
                fetcher: Arc::new(MockImageFetcher::new()),
            },
            EngineOptions::default(),
        ))
    }

    #[test]
    fn test_event_wire_format() {
        let event: InboundEvent = serde_json::from_str(r#"{"type":"guild_delete","guild_id":"7"}"#).unwrap();
        assert_eq!(event, InboundEvent::GuildDelete { guild_id: GuildId(7), available: true });

        let event: InboundEvent = serde_json::from_str(
            r#"{"type":"member_add","member":{"guild_id":"1","user_id":"2","username":"bob","display_name":"Bob","nickname":null,"avatar_url":null}}"#,
        )
        .unwrap();
        assert_eq!(event.name(), "member_add");
    }

    #[tokio::test]
    async fn test_events_dropped_until_ready() {
        let mut config = MockConfigStore::new();
        config.expect_add_guild().never();
        let dispatcher = EventDispatcher::new(engine(config, MockMemberDirectory::new(), MockAvatarCache::new()));

        assert_eq!(dispatcher.state(), LifecycleState::Initializing);
        let accepted = dispatcher.dispatch(InboundEvent::GuildCreate { guild_id: GuildId(5) }).await.unwrap();
        assert!(!accepted);
    }

    #[tokio::test]
    async fn test_start_sequence_then_accepts_events() {
        let mut seq = Sequence::new();
        let mut config = MockConfigStore::new();
        let mut directory = MockMemberDirectory::new();
        let mut cache = MockAvatarCache::new();

        directory.expect_guilds().returning(|| Ok(vec![GuildId(5)]));
        config
            .expect_configured_guilds()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(vec![]));
        config
            .expect_add_guild()
            .with(eq(GuildId(5)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        config
            .expect_all_protected_users()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(vec![]));
        cache.expect_rebuild().times(1).in_sequence(&mut seq).returning(|_| Ok(()));
        config.expect_get_config().returning(|_| Ok(Some(bn_core::GuildConfig::default())));
        config.expect_protected_users().returning(|_| Ok(vec![UserId(1)]));
        config.expect_add_guild().with(eq(GuildId(6))).times(1).returning(|_| Ok(()));

        let dispatcher = EventDispatcher::new(engine(config, directory, cache));
        let reports = dispatcher.start().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(dispatcher.state(), LifecycleState::Ready);

        let accepted = dispatcher.dispatch(InboundEvent::GuildCreate { guild_id: GuildId(6) }).await.unwrap();
        assert!(accepted);
    }

    #[tokio::test]
    async fn test_start_survives_failed_repair() {
        let mut config = MockConfigStore::new();
        let mut directory = MockMemberDirectory::new();
        let mut cache = MockAvatarCache::new();

        directory
            .expect_guilds()
            .returning(|| Err(bn_core::AppError::Io("gateway down".to_string())));
        config.expect_all_protected_users().returning(|| Ok(vec![]));
        cache.expect_rebuild().returning(|_| Ok(()));

        let dispatcher = EventDispatcher::new(engine(config, directory, cache));
        assert!(dispatcher.start().await.is_empty());
        assert!(dispatcher.accepts());
    }
}
