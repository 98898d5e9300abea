//! Request and response bodies of the relay API.

use bn_core::{GuildId, Notice, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub(crate) struct CurrentUserBody {
    pub id: UserId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UrlBody {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InviteBody {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AllowedBody {
    pub allowed: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct NicknameBody<'a> {
    pub nick: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct AuditBody<'a> {
    pub reason: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct BanBody<'a> {
    pub delete_message_seconds: u32,
    pub reason: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct NoticeBody {
    pub guild_id: GuildId,
    #[serde(flatten)]
    pub notice: Notice,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bn_core::{Capabilities, ChannelInfo, ChannelKind, Member, ViolationType};

    #[test]
    fn test_member_payload() {
        let member: Member = serde_json::from_str(
            r#"{"guild_id":"1","user_id":"1152921504606846976","username":"alice",
                "display_name":"Alice","nickname":null,"avatar_url":"https://cdn.test/a.png"}"#,
        )
        .unwrap();
        assert_eq!(member.user_id, UserId(1_152_921_504_606_846_976));
        assert!(!member.is_bot);
    }

    #[test]
    fn test_channel_payload_tolerates_unknown_kinds() {
        let channels: Vec<ChannelInfo> = serde_json::from_str(
            r#"[{"id":"5","kind":"text","can_create_invite":true},
                {"id":"6","kind":"directory","can_create_invite":false}]"#,
        )
        .unwrap();
        assert_eq!(channels[1].kind, ChannelKind::Other);

        let caps: Capabilities =
            serde_json::from_str(r#"{"manageable":true,"kickable":false,"bannable":false}"#).unwrap();
        assert!(caps.manageable);
    }

    #[test]
    fn test_notice_body_is_flat() {
        let body = NoticeBody {
            guild_id: GuildId(3),
            notice: Notice::Kicked { reason: ViolationType::GlobalName, rejoin_url: None },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["guild_id"], "3");
        assert_eq!(json["kind"], "kicked");
        assert_eq!(json["reason"], "global_name");
    }
}
