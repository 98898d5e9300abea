//! # Engine
//!
//! Wires detection, resolution and punishment to the ports, and exposes the
//! entry points the event layer and administrators call.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use bn_core::{
    Action, AppError, AvatarCache, AvatarSource, CommunityScan, ConfigPatch, ConfigStore,
    DetectionReport, DetectionResult, GuildConfig, GuildId, ImageFetcher, Member, MemberDirectory,
    Messenger, Moderator, ProtectedIdentity, Result, SweepReport, UserId,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::detection::{check_avatar_bytes, check_username, AvatarCorpus, AvatarVerdict};
use crate::punishment::Punisher;
use crate::resolver::resolve;

/// The collaborators the engine drives.
#[derive(Clone)]
pub struct Ports {
    pub config: Arc<dyn ConfigStore>,
    pub directory: Arc<dyn MemberDirectory>,
    pub moderator: Arc<dyn Moderator>,
    pub messenger: Arc<dyn Messenger>,
    pub cache: Arc<dyn AvatarCache>,
    pub fetcher: Arc<dyn ImageFetcher>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    pub avatar_verdict: AvatarVerdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    SelfAccount,
    Bot,
    Unconfigured,
    Disabled,
    Protected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Evaluation {
    Skipped { reason: SkipReason },
    /// `applied` is false when the service lacked the permission to act.
    Decided { action: Action, applied: bool },
}

/// Name and avatar data to test without a real member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CustomMember {
    pub username: String,
    pub nickname: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Outcome of an administrative configuration update.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigUpdate {
    pub config: GuildConfig,
    /// The change can newly implicate members; the community should be swept.
    pub resweep: bool,
}

/// Everything detection needs about one community. Protected identities and
/// the decoded avatar corpus load on first use, so members of one sweep share
/// a single load.
pub struct GuildContext {
    pub guild_id: GuildId,
    pub config: GuildConfig,
    pub protected: Arc<Vec<UserId>>,
    identities: OnceCell<Vec<ProtectedIdentity>>,
    corpus: OnceCell<Arc<AvatarCorpus>>,
}

pub struct Engine {
    ports: Ports,
    punisher: Punisher,
    options: EngineOptions,
    protected: DashMap<GuildId, Arc<Vec<UserId>>>,
    /// Bumped by every invalidation; a store read that raced one is not cached.
    protected_generation: AtomicU64,
    self_id: OnceLock<UserId>,
}

impl Engine {
    pub fn new(ports: Ports, options: EngineOptions) -> Self {
        let punisher = Punisher::new(ports.moderator.clone(), ports.messenger.clone());
        Self {
            ports,
            punisher,
            options,
            protected: DashMap::new(),
            protected_generation: AtomicU64::new(0),
            self_id: OnceLock::new(),
        }
    }

    // ── Detection pipeline ─────────────────────────────────────────────────

    /// Detects, resolves and acts on one member.
    pub async fn evaluate_and_act(&self, member: &Member) -> Result<Evaluation> {
        match self.guild_context(member.guild_id).await? {
            Some(ctx) => self.evaluate_in(&ctx, member).await,
            None => Ok(Evaluation::Skipped { reason: SkipReason::Unconfigured }),
        }
    }

    pub async fn evaluate_in(&self, ctx: &GuildContext, member: &Member) -> Result<Evaluation> {
        if let Some(reason) = self.skip_reason(ctx, member).await? {
            debug!(guild_id = %member.guild_id, user_id = %member.user_id, ?reason, "member skipped");
            return Ok(Evaluation::Skipped { reason });
        }

        let (username, avatar) = self.detect(ctx, member).await?;
        let action = resolve(&username, &avatar, ctx.config.require_both);
        if action == Action::None {
            return Ok(Evaluation::Decided { action, applied: false });
        }

        info!(
            guild_id = %member.guild_id,
            user_id = %member.user_id,
            username_violation = ?username.violation,
            avatar_violation = ?avatar.violation,
            action = action.name(),
            "impersonation detected"
        );
        let applied = self.punisher.execute(member, action).await?;
        Ok(Evaluation::Decided { action, applied })
    }

    async fn skip_reason(&self, ctx: &GuildContext, member: &Member) -> Result<Option<SkipReason>> {
        if member.user_id == self.self_id().await? {
            return Ok(Some(SkipReason::SelfAccount));
        }
        if member.is_bot {
            return Ok(Some(SkipReason::Bot));
        }
        if !ctx.config.enabled {
            return Ok(Some(SkipReason::Disabled));
        }
        if ctx.protected.contains(&member.user_id) {
            return Ok(Some(SkipReason::Protected));
        }
        Ok(None)
    }

    /// Runs the username and avatar checks; an avatar fetch or decode failure
    /// aborts the whole detection.
    pub async fn detect(&self, ctx: &GuildContext, member: &Member) -> Result<(DetectionResult, DetectionResult)> {
        let identities = self.identities(ctx).await?;
        let username = check_username(
            identities,
            &member.username,
            member.nickname.as_deref(),
            &member.display_name,
            &ctx.config.username,
        );
        let avatar = match &member.avatar_url {
            Some(url) => self.check_avatar_url(ctx, url).await?,
            None => DetectionResult::NONE,
        };
        Ok((username, avatar))
    }

    async fn check_avatar_url(&self, ctx: &GuildContext, url: &str) -> Result<DetectionResult> {
        let corpus = self.corpus(ctx).await?;
        if corpus.is_empty() {
            return Ok(DetectionResult::NONE);
        }
        let bytes = self.ports.fetcher.fetch(url).await?;
        let thresholds = ctx.config.avatar;
        let verdict = self.options.avatar_verdict;
        tokio::task::spawn_blocking(move || check_avatar_bytes(&corpus, &bytes, &thresholds, verdict))
            .await
            .map_err(|err| AppError::Internal(format!("avatar comparison task failed: {err}")))?
    }

    pub async fn guild_context(&self, guild_id: GuildId) -> Result<Option<GuildContext>> {
        let Some(config) = self.ports.config.get_config(guild_id).await? else {
            return Ok(None);
        };
        let protected = self.protected_users(guild_id).await?;
        Ok(Some(GuildContext {
            guild_id,
            config,
            protected,
            identities: OnceCell::new(),
            corpus: OnceCell::new(),
        }))
    }

    /// Protected members currently in the community, in protected-list order.
    async fn identities<'a>(&self, ctx: &'a GuildContext) -> Result<&'a [ProtectedIdentity]> {
        let identities = ctx
            .identities
            .get_or_try_init(|| async {
                let mut identities = Vec::with_capacity(ctx.protected.len());
                for &user_id in ctx.protected.iter() {
                    match self.ports.directory.member(ctx.guild_id, user_id).await? {
                        Some(member) => identities.push(member.identity()),
                        None => debug!(guild_id = %ctx.guild_id, %user_id, "protected user is not a member"),
                    }
                }
                Ok::<_, AppError>(identities)
            })
            .await?;
        Ok(identities.as_slice())
    }

    async fn corpus(&self, ctx: &GuildContext) -> Result<Arc<AvatarCorpus>> {
        let corpus = ctx
            .corpus
            .get_or_try_init(|| async {
                let cached = self.ports.cache.load(&ctx.protected).await?;
                tokio::task::spawn_blocking(move || Arc::new(AvatarCorpus::decode(&cached)))
                    .await
                    .map_err(|err| AppError::Internal(format!("avatar decode task failed: {err}")))
            })
            .await?;
        Ok(corpus.clone())
    }

    async fn self_id(&self) -> Result<UserId> {
        if let Some(id) = self.self_id.get() {
            return Ok(*id);
        }
        let id = self.ports.directory.current_user().await?;
        Ok(*self.self_id.get_or_init(|| id))
    }

    // ── Protected set ──────────────────────────────────────────────────────

    pub async fn protected_users(&self, guild_id: GuildId) -> Result<Arc<Vec<UserId>>> {
        if let Some(entry) = self.protected.get(&guild_id) {
            return Ok(entry.value().clone());
        }
        let generation = self.protected_generation.load(Ordering::SeqCst);
        let users = Arc::new(self.ports.config.protected_users(guild_id).await?);

        // The entry guard holds the shard lock, so an invalidation either bumps
        // the generation before this check or removes the entry after the insert.
        match self.protected.entry(guild_id) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                if self.protected_generation.load(Ordering::SeqCst) == generation {
                    entry.insert(users.clone());
                } else {
                    debug!(%guild_id, "protected list changed during load, not caching");
                }
                Ok(users)
            }
        }
    }

    fn invalidate_protected(&self, guild_id: GuildId) {
        self.protected_generation.fetch_add(1, Ordering::SeqCst);
        self.protected.remove(&guild_id);
    }

    // ── Sweeps ─────────────────────────────────────────────────────────────

    /// Re-evaluates every member of a community concurrently. Per-member
    /// failures are logged and collected; they never abort siblings.
    pub async fn sweep(&self, guild_id: GuildId) -> Result<SweepReport> {
        let mut report = SweepReport { guild_id, evaluated: 0, failures: Vec::new() };
        let Some(ctx) = self.guild_context(guild_id).await? else {
            debug!(%guild_id, "sweep skipped, community not configured");
            return Ok(report);
        };
        if !ctx.config.enabled {
            debug!(%guild_id, "sweep skipped, detection disabled");
            return Ok(report);
        }

        let members = self.ports.directory.members(guild_id).await?;
        let outcomes = join_all(members.iter().map(|member| self.evaluate_in(&ctx, member))).await;

        for (member, outcome) in members.iter().zip(outcomes) {
            report.evaluated += 1;
            if let Err(err) = outcome {
                error!(%guild_id, user_id = %member.user_id, error = %err, "failed to evaluate member");
                report.failures.push((member.user_id, err.to_string()));
            }
        }
        info!(%guild_id, evaluated = report.evaluated, failed = report.failures.len(), "sweep finished");
        Ok(report)
    }

    /// Sweeps every community the service belongs to, each independently.
    pub async fn sweep_all(&self) -> Result<Vec<SweepReport>> {
        let guilds = self.ports.directory.guilds().await?;
        info!(communities = guilds.len(), "checking for violations in all communities");

        let results = join_all(guilds.iter().map(|&guild_id| self.sweep(guild_id))).await;
        let mut reports = Vec::with_capacity(results.len());
        for (guild_id, result) in guilds.iter().zip(results) {
            match result {
                Ok(report) => reports.push(report),
                Err(err) => error!(%guild_id, error = %err, "failed to sweep community"),
            }
        }
        Ok(reports)
    }

    // ── Startup ────────────────────────────────────────────────────────────

    /// Aligns stored configuration with the communities the service is in:
    /// adds defaults for communities joined while offline, drops the entries
    /// of communities left.
    pub async fn repair_config(&self) -> Result<()> {
        info!("checking for communities joined or left while offline");
        let joined: HashSet<GuildId> = self.ports.directory.guilds().await?.into_iter().collect();
        let configured: HashSet<GuildId> = self.ports.config.configured_guilds().await?.into_iter().collect();

        for &guild_id in joined.difference(&configured) {
            info!(%guild_id, "joined community while offline, adding config");
            self.ports.config.add_guild(guild_id).await?;
        }
        for &guild_id in configured.difference(&joined) {
            info!(%guild_id, "left community while offline, removing config");
            self.ports.config.remove_guild(guild_id).await?;
            self.invalidate_protected(guild_id);
        }
        Ok(())
    }

    /// Rebuilds the avatar cache from scratch for every protected user.
    pub async fn rebuild_avatar_cache(&self) -> Result<()> {
        info!("building avatar cache, this may take a while");
        let mut seen = HashSet::new();
        let mut sources = Vec::new();
        for user_id in self.ports.config.all_protected_users().await? {
            if !seen.insert(user_id) {
                continue;
            }
            match self.ports.directory.avatar_url(user_id).await {
                Ok(Some(url)) => sources.push(AvatarSource { user_id, url }),
                Ok(None) => debug!(%user_id, "protected user has no avatar"),
                Err(err) => warn!(%user_id, error = %err, "failed to look up protected avatar"),
            }
        }
        self.ports.cache.rebuild(&sources).await?;
        info!(cached = sources.len(), "avatar cache built");
        Ok(())
    }

    async fn refresh_cached_avatar(&self, user_id: UserId) {
        let refreshed = match self.ports.directory.avatar_url(user_id).await {
            Ok(Some(url)) => self.ports.cache.put(&AvatarSource { user_id, url }).await,
            Ok(None) => self.ports.cache.remove(user_id).await,
            Err(err) => Err(err),
        };
        if let Err(err) = refreshed {
            warn!(%user_id, error = %err, "failed to refresh cached avatar");
        }
    }

    // ── Platform events ────────────────────────────────────────────────────

    pub async fn on_member_add(&self, member: &Member) -> Result<Evaluation> {
        self.evaluate_and_act(member).await
    }

    /// Refreshes the cache when a protected member changes avatar, and
    /// re-evaluates the member when any identity field changed.
    pub async fn on_member_update(&self, old: &Member, new: &Member) -> Result<Option<Evaluation>> {
        let avatar_changed = old.avatar_url != new.avatar_url;
        if avatar_changed && self.protected_users(new.guild_id).await?.contains(&new.user_id) {
            self.refresh_cached_avatar(new.user_id).await;
        }

        if avatar_changed || old.names_differ(new) {
            return self.evaluate_and_act(new).await.map(Some);
        }
        Ok(None)
    }

    pub async fn on_guild_create(&self, guild_id: GuildId) -> Result<()> {
        info!(%guild_id, "joined community");
        self.ports.config.add_guild(guild_id).await
    }

    /// `available == false` means a platform outage, not a departure.
    pub async fn on_guild_delete(&self, guild_id: GuildId, available: bool) -> Result<()> {
        if !available {
            warn!(%guild_id, "community unavailable, keeping its config");
            return Ok(());
        }
        info!(%guild_id, "left community");
        self.ports.config.remove_guild(guild_id).await?;
        self.invalidate_protected(guild_id);
        Ok(())
    }

    // ── Administration ─────────────────────────────────────────────────────

    pub async fn config(&self, guild_id: GuildId) -> Result<GuildConfig> {
        self.ports
            .config
            .get_config(guild_id)
            .await?
            .ok_or_else(|| AppError::NotFound("community config".to_string(), guild_id.to_string()))
    }

    /// Applies a partial update. Enabling detection or dropping the
    /// both-required policy asks for a re-sweep.
    pub async fn update_config(&self, guild_id: GuildId, patch: &ConfigPatch) -> Result<ConfigUpdate> {
        let current = self.config(guild_id).await?;
        let next = current.patched(patch);
        next.validate()?;

        let store = &self.ports.config;
        let mut resweep = false;
        if let Some(enabled) = patch.enabled {
            resweep |= store.set_enabled(guild_id, enabled).await? && enabled;
        }
        if patch.username_soft.is_some() || patch.username_hard.is_some() {
            store.set_username_thresholds(guild_id, next.username.soft, next.username.hard).await?;
        }
        if patch.avatar_soft.is_some() || patch.avatar_hard.is_some() {
            store.set_avatar_thresholds(guild_id, next.avatar.soft, next.avatar.hard).await?;
        }
        if let Some(require_both) = patch.require_both {
            resweep |= store.set_require_both(guild_id, require_both).await? && !require_both;
        }

        info!(%guild_id, ?patch, resweep, "configuration updated");
        Ok(ConfigUpdate { config: next, resweep })
    }

    /// Returns whether the user was newly protected.
    pub async fn protect(&self, guild_id: GuildId, user_id: UserId) -> Result<bool> {
        let added = self.ports.config.add_protected_user(guild_id, user_id).await?;
        if added {
            self.invalidate_protected(guild_id);
            self.refresh_cached_avatar(user_id).await;
            info!(%guild_id, %user_id, "protected member");
        }
        Ok(added)
    }

    /// Returns whether the user was protected before. The cached avatar is
    /// kept while another community still protects the user.
    pub async fn unprotect(&self, guild_id: GuildId, user_id: UserId) -> Result<bool> {
        let removed = self.ports.config.remove_protected_user(guild_id, user_id).await?;
        if removed {
            self.invalidate_protected(guild_id);
            if !self.ports.config.all_protected_users().await?.contains(&user_id) {
                // The list change is already committed.
                if let Err(err) = self.ports.cache.remove(user_id).await {
                    warn!(%user_id, error = %err, "failed to drop cached avatar");
                }
            }
            info!(%guild_id, %user_id, "stopped protecting member");
        }
        Ok(removed)
    }

    // ── Diagnostics (detect only, never act) ───────────────────────────────

    pub async fn test_member(&self, guild_id: GuildId, user_id: UserId) -> Result<DetectionReport> {
        let member = self
            .ports
            .directory
            .member(guild_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("member".to_string(), user_id.to_string()))?;
        let ctx = self.require_context(guild_id).await?;
        let (username, avatar) = self.detect(&ctx, &member).await?;
        Ok(DetectionReport {
            username,
            avatar,
            is_protected: ctx.protected.contains(&user_id),
            is_bot: member.is_bot,
        })
    }

    pub async fn test_custom(&self, guild_id: GuildId, custom: &CustomMember) -> Result<DetectionReport> {
        let ctx = self.require_context(guild_id).await?;
        let custom_member = Member {
            guild_id,
            user_id: UserId(0),
            username: custom.username.clone(),
            display_name: custom.display_name.clone().unwrap_or_else(|| custom.username.clone()),
            nickname: custom.nickname.clone(),
            is_bot: false,
            avatar_url: custom.avatar_url.clone(),
        };
        let (username, avatar) = self.detect(&ctx, &custom_member).await?;
        Ok(DetectionReport { username, avatar, is_protected: false, is_bot: false })
    }

    /// Members that would be detected, protected members excluded.
    pub async fn test_all(&self, guild_id: GuildId) -> Result<CommunityScan> {
        let ctx = self.require_context(guild_id).await?;
        let mut scan = CommunityScan::default();
        for member in self.ports.directory.members(guild_id).await? {
            if ctx.protected.contains(&member.user_id) {
                continue;
            }
            let (username, avatar) = self.detect(&ctx, &member).await?;
            if username.is_violation() {
                scan.username_detections.push(member.user_id);
            }
            if avatar.is_violation() {
                scan.avatar_detections.push(member.user_id);
            }
        }
        Ok(scan)
    }

    async fn require_context(&self, guild_id: GuildId) -> Result<GuildContext> {
        self.guild_context(guild_id)
            .await?
            .ok_or_else(|| AppError::NotFound("community config".to_string(), guild_id.to_string()))
    }
}
