//! # Punishment
//!
//! Executes a resolved [`Action`] against a member. Each action is gated on
//! the matching capability: without it the action is a no-op reporting
//! `false`. Notifications are best effort; the moderation call itself is
//! not, and its failure surfaces as [`AppError::ActionFailed`].

use std::sync::Arc;

use bn_core::{Action, AppError, Member, Messenger, Moderator, Notice, Result, ViolationType};
use tracing::{info, warn};

use crate::invite::rejoin_link;

pub const NICKNAME_PREFIX: &str = "[IMPERSONATOR] ";
/// Platform limit on nickname length, in characters.
pub const MAX_NICKNAME_CHARS: usize = 32;
pub const AUDIT_REASON: &str = "Banna - Automatic Detection: Impersonator";
/// Messages from the last day are purged alongside a ban.
pub const BAN_DELETE_MESSAGE_SECS: u32 = 24 * 60 * 60;

/// Prefixed and truncated to the platform nickname limit.
pub fn impersonator_nickname(current: &str) -> String {
    format!("{NICKNAME_PREFIX}{current}")
        .chars()
        .take(MAX_NICKNAME_CHARS)
        .collect()
}

pub struct Punisher {
    moderator: Arc<dyn Moderator>,
    messenger: Arc<dyn Messenger>,
}

impl Punisher {
    pub fn new(moderator: Arc<dyn Moderator>, messenger: Arc<dyn Messenger>) -> Self {
        Self { moderator, messenger }
    }

    /// Returns whether the action was carried out. `Action::None` is trivially
    /// carried out.
    pub async fn execute(&self, member: &Member, action: Action) -> Result<bool> {
        match action {
            Action::None => Ok(true),
            Action::ChangeNickname => self.change_nickname(member).await,
            Action::Kick { reason } => self.kick(member, reason).await,
            Action::Ban { username_reason } => self.ban(member, username_reason).await,
        }
    }

    pub async fn change_nickname(&self, member: &Member) -> Result<bool> {
        let caps = self.moderator.capabilities(member.guild_id, member.user_id).await?;
        if !caps.manageable {
            info!(guild_id = %member.guild_id, user_id = %member.user_id, "cannot rename member, missing permission");
            return Ok(false);
        }

        let new_nickname = impersonator_nickname(member.effective_nickname());
        if member.nickname.as_deref() != Some(new_nickname.as_str()) {
            self.moderator
                .set_nickname(member.guild_id, member.user_id, &new_nickname)
                .await
                .map_err(|err| action_failed("rename", member, err))?;
        }
        info!(guild_id = %member.guild_id, user_id = %member.user_id, nickname = %new_nickname, "renamed impersonator");

        self.notify(member, Notice::NicknameChanged { new_nickname }).await;
        Ok(true)
    }

    pub async fn kick(&self, member: &Member, reason: ViolationType) -> Result<bool> {
        let caps = self.moderator.capabilities(member.guild_id, member.user_id).await?;
        if !caps.kickable {
            info!(guild_id = %member.guild_id, user_id = %member.user_id, "cannot kick member, missing permission");
            return Ok(false);
        }

        let rejoin_url = rejoin_link(self.moderator.as_ref(), member.guild_id).await;
        self.notify(member, Notice::Kicked { reason, rejoin_url }).await;

        self.moderator
            .kick(member.guild_id, member.user_id, AUDIT_REASON)
            .await
            .map_err(|err| action_failed("kick", member, err))?;
        info!(guild_id = %member.guild_id, user_id = %member.user_id, ?reason, "kicked impersonator");
        Ok(true)
    }

    pub async fn ban(&self, member: &Member, username_reason: bool) -> Result<bool> {
        let caps = self.moderator.capabilities(member.guild_id, member.user_id).await?;
        if !caps.bannable {
            info!(guild_id = %member.guild_id, user_id = %member.user_id, "cannot ban member, missing permission");
            return Ok(false);
        }

        self.notify(member, Notice::Banned { username_reason }).await;

        self.moderator
            .ban(member.guild_id, member.user_id, BAN_DELETE_MESSAGE_SECS, AUDIT_REASON)
            .await
            .map_err(|err| action_failed("ban", member, err))?;
        info!(guild_id = %member.guild_id, user_id = %member.user_id, username_reason, "banned impersonator");
        Ok(true)
    }

    async fn notify(&self, member: &Member, notice: Notice) {
        if let Err(err) = self.messenger.notify(member.guild_id, member.user_id, notice).await {
            warn!(guild_id = %member.guild_id, user_id = %member.user_id, error = %err, "failed to notify member");
        }
    }
}

fn action_failed(action: &'static str, member: &Member, err: AppError) -> AppError {
    AppError::ActionFailed {
        action,
        user_id: member.user_id,
        reason: err.to_string(),
    }
}
