//! # Domain Models
//!
//! These types describe members, detection verdicts and the actions the
//! service takes. Platform identifiers are 64-bit snowflakes that travel as
//! decimal strings, so JavaScript relays never lose precision.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }

        impl TryFrom<String> for $name {
            type Error = std::num::ParseIntError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.to_string()
            }
        }
    };
}

snowflake!(
    /// A community (guild) on the chat platform.
    GuildId
);
snowflake!(
    /// A platform account.
    UserId
);
snowflake!(ChannelId);

/// Which part of a member's identity matched a protected member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    None,
    Nickname,
    GlobalName,
    Username,
    Avatar,
}

/// Severity of a match, ordered `Exact < Soft < Hard`.
///
/// `Exact` is only produced by exact string equality (nickname, global name);
/// `Soft` and `Hard` come from distance or percentage bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationThreshold {
    Exact,
    Soft,
    Hard,
}

/// Outcome of one detection channel (username family or avatar).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub violation: ViolationType,
    pub threshold: Option<ViolationThreshold>,
}

impl DetectionResult {
    pub const NONE: Self = Self { violation: ViolationType::None, threshold: None };

    pub const fn new(violation: ViolationType, threshold: ViolationThreshold) -> Self {
        Self { violation, threshold: Some(threshold) }
    }

    pub fn is_violation(&self) -> bool {
        self.violation != ViolationType::None
    }

    pub fn is_hard(&self) -> bool {
        self.threshold == Some(ViolationThreshold::Hard)
    }
}

impl Default for DetectionResult {
    fn default() -> Self {
        Self::NONE
    }
}

/// Edit-distance bounds. Lower is a closer match, so `hard <= soft` in any
/// sensible configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameThresholds {
    pub soft: u32,
    pub hard: u32,
}

/// Match-percentage bounds in `[0, 100]`. Higher requires a closer match, so
/// `hard >= soft` in any sensible configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AvatarThresholds {
    pub soft: f64,
    pub hard: f64,
}

/// Per-community detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildConfig {
    pub enabled: bool,
    pub username: UsernameThresholds,
    pub avatar: AvatarThresholds,
    /// Act only when both the username family and the avatar match.
    pub require_both: bool,
}

impl Default for GuildConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            username: UsernameThresholds { soft: 3, hard: 1 },
            avatar: AvatarThresholds { soft: 99.6, hard: 99.97 },
            require_both: true,
        }
    }
}

impl GuildConfig {
    pub fn validate(&self) -> crate::Result<()> {
        for (name, value) in [("avatar soft", self.avatar.soft), ("avatar hard", self.avatar.hard)] {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(crate::AppError::InvalidConfig(format!(
                    "{name} threshold must be within 0..=100, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Applies a partial update, returning the resulting configuration.
    pub fn patched(&self, patch: &ConfigPatch) -> Self {
        let mut next = self.clone();
        if let Some(enabled) = patch.enabled {
            next.enabled = enabled;
        }
        if let Some(soft) = patch.username_soft {
            next.username.soft = soft;
        }
        if let Some(hard) = patch.username_hard {
            next.username.hard = hard;
        }
        if let Some(soft) = patch.avatar_soft {
            next.avatar.soft = soft;
        }
        if let Some(hard) = patch.avatar_hard {
            next.avatar.hard = hard;
        }
        if let Some(require_both) = patch.require_both {
            next.require_both = require_both;
        }
        next
    }
}

/// Partial configuration update issued by an administrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub enabled: Option<bool>,
    pub username_soft: Option<u32>,
    pub username_hard: Option<u32>,
    pub avatar_soft: Option<f64>,
    pub avatar_hard: Option<f64>,
    pub require_both: Option<bool>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// A member of one community as seen by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub username: String,
    /// Global display name, or the username when the account has none.
    pub display_name: String,
    pub nickname: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
    /// Community avatar if set, else the account avatar.
    pub avatar_url: Option<String>,
}

impl Member {
    pub fn effective_nickname(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.display_name)
    }

    pub fn identity(&self) -> ProtectedIdentity {
        ProtectedIdentity {
            user_id: self.user_id,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            nickname: self.nickname.clone(),
        }
    }

    /// True when any of the name fields differ from `other`.
    pub fn names_differ(&self, other: &Member) -> bool {
        self.nickname != other.nickname
            || self.display_name != other.display_name
            || self.username != other.username
    }
}

/// The name fields of a protected member, in the order they are compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedIdentity {
    pub user_id: UserId,
    pub username: String,
    pub display_name: String,
    pub nickname: Option<String>,
}

impl ProtectedIdentity {
    pub fn effective_nickname(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.display_name)
    }
}

/// The remediation chosen for a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    None,
    ChangeNickname,
    Kick { reason: ViolationType },
    Ban { username_reason: bool },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::None => "none",
            Action::ChangeNickname => "change_nickname",
            Action::Kick { .. } => "kick",
            Action::Ban { .. } => "ban",
        }
    }
}

/// What the service is allowed to do to one member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub manageable: bool,
    pub kickable: bool,
    pub bannable: bool,
}

/// Direct notification sent to a remediated member. Rendering is up to the
/// messaging implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    NicknameChanged { new_nickname: String },
    Kicked { reason: ViolationType, rejoin_url: Option<String> },
    Banned { username_reason: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    Announcement,
    Forum,
    StageVoice,
    Voice,
    Category,
    #[serde(other)]
    Other,
}

impl ChannelKind {
    /// Channel kinds an invite can point at for a rejoin link.
    pub fn accepts_invites(&self) -> bool {
        matches!(
            self,
            ChannelKind::Text | ChannelKind::Announcement | ChannelKind::Forum | ChannelKind::StageVoice
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub kind: ChannelKind,
    /// Whether the service may create invites in this channel.
    pub can_create_invite: bool,
}

/// Parameters of a generated rejoin invite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteRequest {
    pub max_age_secs: u32,
    pub max_uses: u32,
    pub unique: bool,
    pub reason: String,
}

/// Container kind of a cached or candidate avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvatarFormat {
    /// Single frame (PNG).
    Static,
    /// Ordered frames (GIF).
    Animated,
}

impl AvatarFormat {
    pub const ALL: [AvatarFormat; 2] = [AvatarFormat::Static, AvatarFormat::Animated];

    /// Derives the format from the file extension of `url`, ignoring any
    /// query string.
    pub fn from_url(url: &str) -> crate::Result<Self> {
        let path = url.split('?').next().unwrap_or(url);
        if path.ends_with(".png") {
            Ok(AvatarFormat::Static)
        } else if path.ends_with(".gif") {
            Ok(AvatarFormat::Animated)
        } else {
            Err(crate::AppError::UnsupportedFormat(format!("unknown avatar extension in url: {url}")))
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AvatarFormat::Static => "png",
            AvatarFormat::Animated => "gif",
        }
    }
}

/// Encoded reference image of one protected user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAvatar {
    pub user_id: UserId,
    pub format: AvatarFormat,
    pub bytes: Vec<u8>,
}

/// Where to download the current avatar of a protected user from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarSource {
    pub user_id: UserId,
    pub url: String,
}

/// Detection-only verdict for diagnostics; no action is taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub username: DetectionResult,
    pub avatar: DetectionResult,
    pub is_protected: bool,
    pub is_bot: bool,
}

/// Members of a community that would be detected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityScan {
    pub username_detections: Vec<UserId>,
    pub avatar_detections: Vec<UserId>,
}

/// Result of re-evaluating every member of one community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub guild_id: GuildId,
    pub evaluated: usize,
    pub failures: Vec<(UserId, String)>,
}
