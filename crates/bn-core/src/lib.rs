//! banna/crates/bn-core/src/lib.rs
//!
//! Domain models, error taxonomy and port traits of the impersonation
//! detector.

pub mod models;
pub mod traits;
pub mod error;

// Re-exporting for easier access in other crates
pub use models::*;
pub use traits::*;
pub use error::*;

#[cfg(test)]
mod tests {
    use super::models::*;

    fn member(nickname: Option<&str>) -> Member {
        Member {
            guild_id: GuildId(1),
            user_id: UserId(42),
            username: "alice".to_string(),
            display_name: "Alice".to_string(),
            nickname: nickname.map(str::to_string),
            is_bot: false,
            avatar_url: None,
        }
    }

    #[test]
    fn test_threshold_severity_order() {
        assert!(ViolationThreshold::Exact < ViolationThreshold::Soft);
        assert!(ViolationThreshold::Soft < ViolationThreshold::Hard);
    }

    #[test]
    fn test_effective_nickname_falls_back_to_display_name() {
        assert_eq!(member(None).effective_nickname(), "Alice");
        assert_eq!(member(Some("Al")).effective_nickname(), "Al");
        assert_eq!(member(None).identity().effective_nickname(), "Alice");
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = GuildConfig::default();
        assert!(!config.enabled);
        assert!(config.require_both);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_avatar_threshold_out_of_range_rejected() {
        let mut config = GuildConfig::default();
        config.avatar.hard = 100.5;
        assert!(matches!(config.validate(), Err(crate::AppError::InvalidConfig(_))));

        config.avatar.hard = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_patch_only_touches_given_fields() {
        let patch = ConfigPatch { username_hard: Some(0), require_both: Some(false), ..Default::default() };
        let next = GuildConfig::default().patched(&patch);
        assert_eq!(next.username, UsernameThresholds { soft: 3, hard: 0 });
        assert!(!next.require_both);
        assert_eq!(next.avatar, GuildConfig::default().avatar);
        assert!(ConfigPatch::default().is_empty());
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_snowflakes_serialize_as_strings() {
        let json = serde_json::to_string(&UserId(1_234_567_890_123_456_789)).unwrap();
        assert_eq!(json, "\"1234567890123456789\"");
        let back: GuildId = serde_json::from_str("\"77\"").unwrap();
        assert_eq!(back, GuildId(77));
    }

    #[test]
    fn test_avatar_format_from_url_ignores_query() {
        assert_eq!(
            AvatarFormat::from_url("https://cdn.example/avatars/1/a_abc.gif?size=256").unwrap(),
            AvatarFormat::Animated
        );
        assert_eq!(AvatarFormat::from_url("https://cdn.example/1/abc.png").unwrap(), AvatarFormat::Static);
        assert!(matches!(
            AvatarFormat::from_url("https://cdn.example/1/abc.webp?x=.png"),
            Err(crate::AppError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_names_differ_ignores_avatar() {
        let old = member(None);
        let mut new = old.clone();
        new.avatar_url = Some("https://cdn/avatar.png".to_string());
        assert!(!old.names_differ(&new));
        new.nickname = Some("x".to_string());
        assert!(old.names_differ(&new));
    }
}
