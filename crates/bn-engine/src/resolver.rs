//! Turns the two detection verdicts into a single action.
//!
//! Pure and deterministic: nothing here talks to the platform.

use bn_core::{Action, DetectionResult, ViolationThreshold, ViolationType};

pub fn resolve(username: &DetectionResult, avatar: &DetectionResult, require_both: bool) -> Action {
    if require_both {
        resolve_both_required(username, avatar)
    } else {
        resolve_any(username, avatar)
    }
}

/// Acts only when both channels flagged the member; severity is HARD when
/// either side is HARD.
fn resolve_both_required(username: &DetectionResult, avatar: &DetectionResult) -> Action {
    if !(username.is_violation() && avatar.is_violation()) {
        return Action::None;
    }
    if username.is_hard() || avatar.is_hard() {
        Action::Ban { username_reason: username.violation == ViolationType::Username }
    } else {
        Action::Kick { reason: username.violation }
    }
}

/// Fixed priority, first match wins: bans, then kicks, then the rename.
fn resolve_any(username: &DetectionResult, avatar: &DetectionResult) -> Action {
    let soft = Some(ViolationThreshold::Soft);

    if username.is_hard() {
        Action::Ban { username_reason: true }
    } else if avatar.is_hard() {
        Action::Ban { username_reason: false }
    } else if username.violation == ViolationType::Username && username.threshold == soft {
        Action::Kick { reason: ViolationType::Username }
    } else if username.violation == ViolationType::GlobalName {
        Action::Kick { reason: ViolationType::GlobalName }
    } else if avatar.violation == ViolationType::Avatar && avatar.threshold == soft {
        Action::Kick { reason: ViolationType::Avatar }
    } else if username.violation == ViolationType::Nickname {
        Action::ChangeNickname
    } else {
        Action::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ViolationThreshold::{Exact, Hard, Soft};
    use ViolationType::{Avatar, GlobalName, Nickname, Username};

    const NONE: DetectionResult = DetectionResult::NONE;
    const NICK: DetectionResult = DetectionResult::new(Nickname, Exact);
    const GLOBAL: DetectionResult = DetectionResult::new(GlobalName, Exact);
    const USER_SOFT: DetectionResult = DetectionResult::new(Username, Soft);
    const USER_HARD: DetectionResult = DetectionResult::new(Username, Hard);
    const PIC_SOFT: DetectionResult = DetectionResult::new(Avatar, Soft);
    const PIC_HARD: DetectionResult = DetectionResult::new(Avatar, Hard);

    const fn kick(reason: ViolationType) -> Action {
        Action::Kick { reason }
    }

    const fn ban(username_reason: bool) -> Action {
        Action::Ban { username_reason }
    }

    #[rustfmt::skip]
    const TABLE: &[(DetectionResult, DetectionResult, bool, Action)] = &[
        // Any single violation suffices.
        (NONE,      NONE,     false, Action::None),
        (NONE,      PIC_SOFT, false, kick(Avatar)),
        (NONE,      PIC_HARD, false, ban(false)),
        (NICK,      NONE,     false, Action::ChangeNickname),
        (NICK,      PIC_SOFT, false, kick(Avatar)),
        (NICK,      PIC_HARD, false, ban(false)),
        (GLOBAL,    NONE,     false, kick(GlobalName)),
        (GLOBAL,    PIC_SOFT, false, kick(GlobalName)),
        (GLOBAL,    PIC_HARD, false, ban(false)),
        (USER_SOFT, NONE,     false, kick(Username)),
        (USER_SOFT, PIC_SOFT, false, kick(Username)),
        (USER_SOFT, PIC_HARD, false, ban(false)),
        (USER_HARD, NONE,     false, ban(true)),
        (USER_HARD, PIC_SOFT, false, ban(true)),
        (USER_HARD, PIC_HARD, false, ban(true)),
        // Both channels required.
        (NONE,      NONE,     true,  Action::None),
        (NONE,      PIC_SOFT, true,  Action::None),
        (NONE,      PIC_HARD, true,  Action::None),
        (NICK,      NONE,     true,  Action::None),
        (NICK,      PIC_SOFT, true,  kick(Nickname)),
        (NICK,      PIC_HARD, true,  ban(false)),
        (GLOBAL,    NONE,     true,  Action::None),
        (GLOBAL,    PIC_SOFT, true,  kick(GlobalName)),
        (GLOBAL,    PIC_HARD, true,  ban(false)),
        (USER_SOFT, NONE,     true,  Action::None),
        (USER_SOFT, PIC_SOFT, true,  kick(Username)),
        (USER_SOFT, PIC_HARD, true,  ban(true)),
        (USER_HARD, NONE,     true,  Action::None),
        (USER_HARD, PIC_SOFT, true,  ban(true)),
        (USER_HARD, PIC_HARD, true,  ban(true)),
    ];

    #[test]
    fn test_resolution_table() {
        for (username, avatar, require_both, expected) in TABLE {
            assert_eq!(
                resolve(username, avatar, *require_both),
                *expected,
                "username={username:?} avatar={avatar:?} require_both={require_both}"
            );
        }
    }

    #[test]
    fn test_total_and_deterministic_over_every_combination() {
        let kinds = [ViolationType::None, Nickname, GlobalName, Username, Avatar];
        let thresholds = [None, Some(Exact), Some(Soft), Some(Hard)];
        let all: Vec<DetectionResult> = kinds
            .iter()
            .flat_map(|&violation| thresholds.iter().map(move |&threshold| DetectionResult { violation, threshold }))
            .collect();

        for username in &all {
            for avatar in &all {
                for require_both in [false, true] {
                    let first = resolve(username, avatar, require_both);
                    assert_eq!(first, resolve(username, avatar, require_both));
                }
            }
        }
    }

    #[test]
    fn test_require_both_ignores_lone_username_match() {
        assert_eq!(resolve(&USER_SOFT, &NONE, true), Action::None);
    }
}
