//! Full pipeline runs: SQLite config, on-disk avatar cache, mocked platform.

use bn_core::{
    Action, Capabilities, ConfigPatch, ConfigStore, DetectionResult, Member, MockMemberDirectory,
    MockMessenger, MockModerator, Notice, UserId, ViolationThreshold, ViolationType,
};
use bn_engine::{Engine, Evaluation};
use integration_tests::{avatar_png, member, Rig, GUILD, SERVICE_ACCOUNT};
use mockall::predicate::eq;
use tempfile::TempDir;

const ALICE: UserId = UserId(10);
const ALICE_AVATAR: &str = "https://cdn.test/avatars/10/a1.png?size=256";

/// Directory where ALICE is a member with a cached avatar.
fn directory() -> MockMemberDirectory {
    let mut directory = MockMemberDirectory::new();
    directory.expect_current_user().returning(|| Ok(SERVICE_ACCOUNT));
    directory
        .expect_member()
        .with(eq(GUILD), eq(ALICE))
        .returning(|_, _| Ok(Some(member(10, "alice", Some(ALICE_AVATAR)))));
    directory
        .expect_avatar_url()
        .with(eq(ALICE))
        .returning(|_| Ok(Some(ALICE_AVATAR.to_string())));
    directory
}

async fn configure(rig: &Rig, patch: ConfigPatch) {
    rig.store.add_guild(GUILD).await.unwrap();
    rig.engine.update_config(GUILD, &patch).await.unwrap();
    rig.host.serve(ALICE_AVATAR, avatar_png([220, 40, 40], [250, 250, 250]));
    assert!(rig.engine.protect(GUILD, ALICE).await.unwrap());
}

#[tokio::test]
async fn ban_without_permission_sends_nothing() {
    let dir = TempDir::new().unwrap();
    let mut moderator = MockModerator::new();
    moderator.expect_capabilities().returning(|_, _| Ok(Capabilities::default()));
    moderator.expect_ban().never();
    let mut messenger = MockMessenger::new();
    messenger.expect_notify().never();

    let rig = Rig::new(dir.path(), directory(), moderator, messenger).await;
    configure(
        &rig,
        ConfigPatch {
            enabled: Some(true),
            require_both: Some(false),
            username_soft: Some(5),
            username_hard: Some(2),
            ..ConfigPatch::default()
        },
    )
    .await;

    let outcome = rig.engine.evaluate_and_act(&member(20, "alicf", None)).await.unwrap();
    assert_eq!(outcome, Evaluation::Decided { action: Action::Ban { username_reason: true }, applied: false });
}

#[tokio::test]
async fn require_both_ignores_username_match_alone() {
    let dir = TempDir::new().unwrap();
    let mut moderator = MockModerator::new();
    moderator.expect_capabilities().never();

    let rig = Rig::new(dir.path(), directory(), moderator, MockMessenger::new()).await;
    configure(&rig, ConfigPatch { enabled: Some(true), ..ConfigPatch::default() }).await;

    let candidate = member(20, "alcie", None);
    let verdict = username_verdict(&rig.engine, &candidate).await;
    assert_eq!(verdict, DetectionResult::new(ViolationType::Username, ViolationThreshold::Soft));

    let outcome = rig.engine.evaluate_and_act(&candidate).await.unwrap();
    assert_eq!(outcome, Evaluation::Decided { action: Action::None, applied: false });
}

#[tokio::test]
async fn copied_avatar_gets_banned() {
    let dir = TempDir::new().unwrap();
    let mut moderator = MockModerator::new();
    moderator.expect_capabilities().returning(|_, _| {
        Ok(Capabilities { manageable: true, kickable: true, bannable: true })
    });
    moderator
        .expect_ban()
        .withf(|guild, user, secs, reason| {
            *guild == GUILD && *user == UserId(20) && *secs == 86_400 && reason.contains("Impersonator")
        })
        .times(1)
        .returning(|_, _, _, _| Ok(()));
    let mut messenger = MockMessenger::new();
    messenger
        .expect_notify()
        .with(eq(GUILD), eq(UserId(20)), eq(Notice::Banned { username_reason: false }))
        .times(1)
        .returning(|_, _, _| Ok(()));

    let rig = Rig::new(dir.path(), directory(), moderator, messenger).await;
    configure(
        &rig,
        ConfigPatch { enabled: Some(true), require_both: Some(false), ..ConfigPatch::default() },
    )
    .await;

    let stolen = "https://cdn.test/avatars/20/copy.png";
    rig.host.serve(stolen, avatar_png([220, 40, 40], [250, 250, 250]));

    let outcome = rig
        .engine
        .evaluate_and_act(&member(20, "zzzzzzzz", Some(stolen)))
        .await
        .unwrap();
    assert_eq!(outcome, Evaluation::Decided { action: Action::Ban { username_reason: false }, applied: true });
}

#[tokio::test]
async fn sweep_reports_failures_and_evaluates_everyone_else() {
    let dir = TempDir::new().unwrap();
    let mut directory = directory();
    directory.expect_members().with(eq(GUILD)).returning(|_| {
        Ok((0..6u64)
            .map(|i| {
                let url = format!("https://cdn.test/avatars/{}/x.png", 100 + i);
                member(100 + i, &format!("bystander{i}"), Some(&url))
            })
            .collect())
    });

    let rig = Rig::new(dir.path(), directory, MockModerator::new(), MockMessenger::new()).await;
    configure(&rig, ConfigPatch { enabled: Some(true), ..ConfigPatch::default() }).await;
    for i in (0..6u64).filter(|i| *i != 3) {
        let url = format!("https://cdn.test/avatars/{}/x.png", 100 + i);
        rig.host.serve(&url, avatar_png([10, 10, 200], [0, 0, 0]));
    }

    let report = rig.engine.sweep(GUILD).await.unwrap();
    assert_eq!(report.evaluated, 6);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, UserId(103));

    let fetched = rig.host.requests().iter().filter(|u| u.ends_with("/x.png")).count();
    assert_eq!(fetched, 6, "every bystander avatar was requested once");
}

async fn username_verdict(engine: &Engine, candidate: &Member) -> DetectionResult {
    let ctx = engine.guild_context(candidate.guild_id).await.unwrap().unwrap();
    engine.detect(&ctx, candidate).await.unwrap().0
}
