//! End-to-end flows through the progression service.

use std::time::{Duration, Instant};
use tempfile::TempDir;
use xp_core::testing::{fixed_grant_config, records, TestClock};
use xp_core::{
    ActivityOutcome, ProgressionConfig, ProgressionEvent, ProgressionRecord, ProgressionService,
    ProgressionStore, UserId,
};

fn data_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("xp_data.json")
}

#[tokio::test]
async fn test_cooldown_window_of_sixty_seconds() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let service = ProgressionService::init(fixed_grant_config(data_path(&temp_dir), 7))
        .await
        .unwrap();
    let clock = TestClock::new();
    let alice = UserId::from("alice");
    let bob = UserId::from("bob");

    // t and t+30: exactly one grant
    assert!(service.on_activity(&alice, clock.at(0)).await.unwrap().granted().is_some());
    assert_eq!(
        service.on_activity(&alice, clock.at(30)).await.unwrap(),
        ActivityOutcome::OnCooldown {
            remaining: Duration::from_secs(30)
        }
    );
    assert_eq!(service.query_progress(&alice).await.unwrap().experience, 7);

    // t and t+61: both grant
    assert!(service.on_activity(&bob, clock.at(0)).await.unwrap().granted().is_some());
    assert!(service.on_activity(&bob, clock.at(61)).await.unwrap().granted().is_some());
    assert_eq!(service.query_progress(&bob).await.unwrap().experience, 14);
}

#[tokio::test]
async fn test_prestige_at_level_cap() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = fixed_grant_config(data_path(&temp_dir), 10).with_level_cap(3);
    let service = ProgressionService::init(config).await.unwrap();
    let mut notifications = service.subscribe();
    let admin = UserId::from("admin");
    let user = UserId::from("alice");

    // 100 + 400 reaches the cap at level 3
    let outcome = service.grant_experience(&admin, &user, 500).await.unwrap();
    assert_eq!(outcome.record, ProgressionRecord::new(0, 3, 0));

    // required(3,0) = 900
    let outcome = service.grant_experience(&admin, &user, 950).await.unwrap();
    assert_eq!(outcome.record, ProgressionRecord::new(0, 1, 1));
    let notification = outcome.notification.expect("Prestige should notify");
    assert_eq!(
        notification.events,
        vec![ProgressionEvent::Prestige { new_prestige: 1 }]
    );
    assert_eq!(notification.new_prestige, 1);
    assert_eq!(notification.new_level, 1);

    let first = notifications.recv().await.unwrap();
    assert_eq!(first.new_level, 3);
    let second = notifications.recv().await.unwrap();
    assert_eq!(second, notification);

    // Thresholds grow with prestige: required(1,1) = 130
    let outcome = service.grant_experience(&admin, &user, 120).await.unwrap();
    assert!(outcome.notification.is_none());
}

#[tokio::test]
async fn test_leaderboard_ordering() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = ProgressionStore::new(data_path(&temp_dir));
    store
        .save(&records(&[
            ("A", 0, 5, 1),
            ("B", 0, 8, 1),
            ("C", 0, 99, 0),
        ]))
        .await
        .unwrap();

    let config = ProgressionConfig::new(data_path(&temp_dir)).with_level_cap(100);
    let service = ProgressionService::init(config).await.unwrap();

    let board = service.leaderboard(10).await;
    let order: Vec<&str> = board.iter().map(|e| e.user.as_str()).collect();
    assert_eq!(order, vec!["B", "A", "C"]);
    assert_eq!(board.iter().map(|e| e.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_reset_then_query_yields_default() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let service = ProgressionService::init(fixed_grant_config(data_path(&temp_dir), 10))
        .await
        .unwrap();
    let admin = UserId::from("admin");

    for (user, amount) in [("leveled", 5_000), ("fresh", 1)] {
        let user = UserId::from(user);
        service.grant_experience(&admin, &user, amount).await.unwrap();
        service.reset_progress(&admin, &user).await.unwrap();
        assert_eq!(
            service.query_progress(&user).await.unwrap(),
            ProgressionRecord::default()
        );
    }

    let ghost = UserId::from("never_seen");
    service.reset_progress(&admin, &ghost).await.unwrap();
    assert_eq!(
        service.query_progress(&ghost).await.unwrap(),
        ProgressionRecord::default()
    );
}

#[tokio::test]
async fn test_state_survives_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let user = UserId::from(987654321u64);

    {
        let service = ProgressionService::init(fixed_grant_config(data_path(&temp_dir), 12))
            .await
            .unwrap();
        service.on_activity(&user, Instant::now()).await.unwrap();
        service
            .grant_experience(&UserId::from("admin"), &user, 100)
            .await
            .unwrap();
        service.shutdown().await.unwrap();
    }

    let service = ProgressionService::init(fixed_grant_config(data_path(&temp_dir), 12))
        .await
        .unwrap();
    assert_eq!(
        service.query_progress(&user).await.unwrap(),
        ProgressionRecord::new(12, 2, 0)
    );

    // Cooldowns are memory-only: a restart re-opens the gate
    assert!(service
        .on_activity(&user, Instant::now())
        .await
        .unwrap()
        .granted()
        .is_some());
}

#[tokio::test]
async fn test_corrupted_document_heals_on_init() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(data_path(&temp_dir), "not json at all").unwrap();

    let service = ProgressionService::init(ProgressionConfig::new(data_path(&temp_dir)))
        .await
        .expect("Corruption must not be fatal");

    assert_eq!(service.user_count().await, 0);
    assert_eq!(std::fs::read_to_string(data_path(&temp_dir)).unwrap(), "{}");
}

#[tokio::test]
async fn test_legacy_document_is_normalized_and_rewritten() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(
        data_path(&temp_dir),
        r#"{"111": {"xp": 30, "level": 1}, "222": {"xp": 150, "level": 1}}"#,
    )
    .unwrap();

    let service = ProgressionService::init(ProgressionConfig::new(data_path(&temp_dir)))
        .await
        .unwrap();

    assert_eq!(
        service.query_progress(&UserId::from("111")).await.unwrap(),
        ProgressionRecord::new(30, 1, 0)
    );
    assert_eq!(
        service.query_progress(&UserId::from("222")).await.unwrap(),
        ProgressionRecord::new(50, 2, 0)
    );

    service.shutdown().await.unwrap();
    let content = std::fs::read_to_string(data_path(&temp_dir)).unwrap();
    assert!(content.contains("\"experience\""));
    assert!(!content.contains("\"xp\""));
}
