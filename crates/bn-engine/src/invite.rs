//! Rejoin link for kicked members.

use bn_core::{ChannelInfo, GuildId, InviteRequest, Moderator, Result};
use tracing::{debug, warn};

const INVITE_MAX_AGE_SECS: u32 = 7 * 24 * 60 * 60;
const INVITE_REASON: &str = "Banna - Rejoin option for kicked user";

fn invite_request() -> InviteRequest {
    InviteRequest {
        max_age_secs: INVITE_MAX_AGE_SECS,
        max_uses: 1,
        unique: true,
        reason: INVITE_REASON.to_string(),
    }
}

/// Finds a way back into the community, in order: the vanity link, a fresh
/// invite to the rules channel, a fresh invite to the first channel that
/// accepts one, then any existing invite. Failures are logged and yield
/// `None`; the kick goes ahead either way.
pub async fn rejoin_link(moderator: &dyn Moderator, guild_id: GuildId) -> Option<String> {
    match find_link(moderator, guild_id).await {
        Ok(link) => link,
        Err(err) => {
            warn!(%guild_id, error = %err, "failed to create rejoin invite");
            None
        }
    }
}

async fn find_link(moderator: &dyn Moderator, guild_id: GuildId) -> Result<Option<String>> {
    if let Some(vanity) = moderator.vanity_url(guild_id).await? {
        return Ok(Some(vanity));
    }

    let request = invite_request();
    if let Some(rules) = moderator.rules_channel(guild_id).await? {
        if rules.can_create_invite {
            return moderator.create_invite(rules.id, &request).await.map(Some);
        }
    }

    let channels = moderator.channels(guild_id).await?;
    if let Some(channel) = channels.iter().find(|c| invitable(c)) {
        return moderator.create_invite(channel.id, &request).await.map(Some);
    }

    if moderator.can_manage_guild(guild_id).await? {
        let existing = moderator.existing_invites(guild_id).await?;
        if let Some(url) = existing.into_iter().next() {
            return Ok(Some(url));
        }
    }

    debug!(%guild_id, "no invite source available");
    Ok(None)
}

fn invitable(channel: &ChannelInfo) -> bool {
    channel.kind.accepts_invites() && channel.can_create_invite
}
