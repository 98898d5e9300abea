//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be wired into the binary.
//! With the `testing` feature each trait also gets a mockall `MockXxx`.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    AvatarSource, CachedAvatar, Capabilities, ChannelId, ChannelInfo, GuildConfig, GuildId,
    InviteRequest, Member, Notice, UserId,
};

/// Per-community configuration and protected-member lists.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_config(&self, guild_id: GuildId) -> Result<Option<GuildConfig>>;
    /// Inserts the default configuration unless one exists.
    async fn add_guild(&self, guild_id: GuildId) -> Result<()>;
    /// Drops the configuration and protected list of a community.
    async fn remove_guild(&self, guild_id: GuildId) -> Result<()>;
    async fn configured_guilds(&self) -> Result<Vec<GuildId>>;

    // Setters return whether a stored row changed.
    async fn set_enabled(&self, guild_id: GuildId, enabled: bool) -> Result<bool>;
    async fn set_username_thresholds(&self, guild_id: GuildId, soft: u32, hard: u32) -> Result<bool>;
    async fn set_avatar_thresholds(&self, guild_id: GuildId, soft: f64, hard: f64) -> Result<bool>;
    async fn set_require_both(&self, guild_id: GuildId, require_both: bool) -> Result<bool>;

    /// Protected user ids of one community, in the order they were added.
    async fn protected_users(&self, guild_id: GuildId) -> Result<Vec<UserId>>;
    /// Protected user ids across all communities (may contain duplicates).
    async fn all_protected_users(&self) -> Result<Vec<UserId>>;
    async fn add_protected_user(&self, guild_id: GuildId, user_id: UserId) -> Result<bool>;
    async fn remove_protected_user(&self, guild_id: GuildId, user_id: UserId) -> Result<bool>;
}

/// Downloads raw image bytes.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// One reference image per protected user id.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AvatarCache: Send + Sync {
    /// Clears the whole store, then downloads every source sequentially.
    async fn rebuild(&self, sources: &[AvatarSource]) -> Result<()>;
    /// Replaces the cached image of one user.
    async fn put(&self, source: &AvatarSource) -> Result<()>;
    /// Deletes the cached image of one user; absence is not an error.
    async fn remove(&self, user_id: UserId) -> Result<()>;
    /// Cached images of `user_ids` in the given order; users without a file
    /// are skipped.
    async fn load(&self, user_ids: &[UserId]) -> Result<Vec<CachedAvatar>>;
}

/// Read access to the platform's communities and members.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// The account the service itself runs as.
    async fn current_user(&self) -> Result<UserId>;
    /// Communities the service is currently a member of.
    async fn guilds(&self) -> Result<Vec<GuildId>>;
    async fn members(&self, guild_id: GuildId) -> Result<Vec<Member>>;
    async fn member(&self, guild_id: GuildId, user_id: UserId) -> Result<Option<Member>>;
    /// Account avatar URL (static PNG or animated GIF).
    async fn avatar_url(&self, user_id: UserId) -> Result<Option<String>>;
}

/// Direct notifications to members. Callers treat failures as non-fatal.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn notify(&self, guild_id: GuildId, user_id: UserId, notice: Notice) -> Result<()>;
}

/// Moderation capability over members of a community.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Moderator: Send + Sync {
    async fn capabilities(&self, guild_id: GuildId, user_id: UserId) -> Result<Capabilities>;
    async fn set_nickname(&self, guild_id: GuildId, user_id: UserId, nickname: &str) -> Result<()>;
    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> Result<()>;
    async fn ban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        delete_message_secs: u32,
        reason: &str,
    ) -> Result<()>;

    // Invite sources, in the order the rejoin-link fallback consults them.
    async fn vanity_url(&self, guild_id: GuildId) -> Result<Option<String>>;
    async fn rules_channel(&self, guild_id: GuildId) -> Result<Option<ChannelInfo>>;
    async fn channels(&self, guild_id: GuildId) -> Result<Vec<ChannelInfo>>;
    async fn create_invite(&self, channel_id: ChannelId, request: &InviteRequest) -> Result<String>;
    async fn can_manage_guild(&self, guild_id: GuildId) -> Result<bool>;
    async fn existing_invites(&self, guild_id: GuildId) -> Result<Vec<String>>;
}
