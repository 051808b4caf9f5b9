mod common;

use common::{fixed_now, seed_content_unit, seed_user, setup, CardFixture};
use recall_backend_rust::services::leech;

async fn seed_card_with_lapses(db: &common::TestDb, unit: &str, position: i64, lapses: i64) -> String {
    seed_content_unit(&db.proxy, "u1", unit, position, &[]).await;
    let mut fixture = CardFixture::new("u1", unit);
    fixture.state = "REVIEW";
    fixture.stability = 2.0;
    fixture.difficulty = 6.0;
    fixture.lapses = lapses;
    common::insert_card(&db.proxy, &fixture).await
}

#[tokio::test]
async fn high_lapse_cards_are_listed_as_leeches() {
    let db = setup().await;
    seed_user(&db.proxy, "u1").await;
    let leechy = seed_card_with_lapses(&db, "a", 0, 8).await;
    let healthy = seed_card_with_lapses(&db, "b", 1, 3).await;

    let leeches = leech::list_leech_cards(&db.proxy, "u1").await.unwrap();
    assert_eq!(leeches.len(), 1);
    assert_eq!(leeches[0].card_state.id, leechy);
    assert_eq!(leeches[0].leech_reason, "High lapse count");
    assert!(!leeches[0].suspended);

    assert!(leeches.iter().all(|l| l.card_state.id != healthy));
}

#[tokio::test]
async fn low_recent_retention_flags_a_leech() {
    let db = setup().await;
    seed_user(&db.proxy, "u1").await;
    let card_id = seed_card_with_lapses(&db, "a", 0, 0).await;

    // 4 recent logs, 3 forgotten: 25% retention
    let now = fixed_now();
    for (i, rating) in [1i64, 1, 3, 1].into_iter().enumerate() {
        common::insert_log(
            &db.proxy,
            &card_id,
            "u1",
            rating,
            now - chrono::Duration::hours(i as i64 + 1),
        )
        .await;
    }

    let leeches = leech::list_leech_cards(&db.proxy, "u1").await.unwrap();
    assert_eq!(leeches.len(), 1);
    assert_eq!(leeches[0].leech_reason, "Low retention");
    assert_eq!(leeches[0].recent_retention, Some(25.0));
}

#[tokio::test]
async fn too_few_logs_never_flag_retention() {
    let db = setup().await;
    seed_user(&db.proxy, "u1").await;
    let card_id = seed_card_with_lapses(&db, "a", 0, 0).await;

    for i in 0..3i64 {
        common::insert_log(
            &db.proxy,
            &card_id,
            "u1",
            1,
            fixed_now() - chrono::Duration::hours(i + 1),
        )
        .await;
    }

    let leeches = leech::list_leech_cards(&db.proxy, "u1").await.unwrap();
    assert!(leeches.is_empty());
}

#[tokio::test]
async fn both_reasons_combine_in_the_annotation() {
    let db = setup().await;
    seed_user(&db.proxy, "u1").await;
    let card_id = seed_card_with_lapses(&db, "a", 0, 9).await;

    for i in 0..5i64 {
        common::insert_log(
            &db.proxy,
            &card_id,
            "u1",
            1,
            fixed_now() - chrono::Duration::hours(i + 1),
        )
        .await;
    }

    let leeches = leech::list_leech_cards(&db.proxy, "u1").await.unwrap();
    assert_eq!(leeches.len(), 1);
    assert_eq!(leeches[0].leech_reason, "High lapse count; Low retention");
}

#[tokio::test]
async fn bulk_suspend_skips_foreign_and_unknown_ids() {
    let db = setup().await;
    seed_user(&db.proxy, "u1").await;
    seed_user(&db.proxy, "u2").await;
    let mine = seed_card_with_lapses(&db, "a", 0, 8).await;

    seed_content_unit(&db.proxy, "u2", "theirs", 0, &[]).await;
    let theirs = common::insert_card(&db.proxy, &CardFixture::new("u2", "theirs")).await;

    let ids = vec![mine.clone(), theirs.clone(), "ghost".to_string()];
    let result = leech::bulk_suspend_cards(&db.proxy, "u1", &ids, true)
        .await
        .unwrap();

    assert_eq!(result.succeeded, vec![mine.clone()]);
    assert_eq!(result.skipped.len(), 2);
    assert!(result.skipped.contains(&theirs));
    assert!(result.skipped.contains(&"ghost".to_string()));

    let leeches = leech::list_leech_cards(&db.proxy, "u1").await.unwrap();
    assert!(leeches[0].suspended);

    // and back
    let result = leech::bulk_suspend_cards(&db.proxy, "u1", &[mine], false)
        .await
        .unwrap();
    assert_eq!(result.succeeded.len(), 1);
    let leeches = leech::list_leech_cards(&db.proxy, "u1").await.unwrap();
    assert!(!leeches[0].suspended);
}

#[tokio::test]
async fn leech_stats_aggregate_in_one_pass() {
    let db = setup().await;
    seed_user(&db.proxy, "u1").await;

    // high lapses, suspended
    let a = seed_card_with_lapses(&db, "a", 0, 10).await;
    leech::bulk_suspend_cards(&db.proxy, "u1", &[a], true)
        .await
        .unwrap();

    // low retention only
    let b = seed_card_with_lapses(&db, "b", 1, 0).await;
    for i in 0..4i64 {
        common::insert_log(&db.proxy, &b, "u1", 1, fixed_now() - chrono::Duration::hours(i + 1))
            .await;
    }

    // both reasons
    let c = seed_card_with_lapses(&db, "c", 2, 8).await;
    for i in 0..4i64 {
        common::insert_log(&db.proxy, &c, "u1", 2, fixed_now() - chrono::Duration::hours(i + 1))
            .await;
    }

    // healthy
    seed_card_with_lapses(&db, "d", 3, 1).await;

    let stats = leech::get_leech_stats(&db.proxy, "u1").await.unwrap();
    assert_eq!(stats.total_leeches, 3);
    assert_eq!(stats.suspended_count, 1);
    assert_eq!(stats.high_lapses_count, 2);
    assert_eq!(stats.low_retention_count, 2);
}
