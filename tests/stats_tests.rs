mod common;

use common::{days, fixed_now, seed_content_unit, seed_user, setup, CardFixture};
use recall_backend_rust::services::stats;

#[tokio::test]
async fn empty_user_gets_zero_counts_and_no_retention() {
    let db = setup().await;
    seed_user(&db.proxy, "u1").await;

    let s = stats::get_stats(&db.proxy, "u1", fixed_now()).await.unwrap();
    assert_eq!(s.total_cards, 0);
    assert_eq!(s.new_cards, 0);
    assert_eq!(s.learning_cards, 0);
    assert_eq!(s.review_cards, 0);
    assert_eq!(s.due_now, 0);
    assert_eq!(s.reviewed_today, 0);
    assert_eq!(s.retention_rate, None);
}

#[tokio::test]
async fn retention_counts_only_todays_logs() {
    // Three today-logs {3,4,3}, one yesterday-log {3}
    let db = setup().await;
    seed_user(&db.proxy, "u1").await;
    seed_content_unit(&db.proxy, "u1", "unit", 0, &[]).await;
    let card_id = common::insert_card(&db.proxy, &CardFixture::new("u1", "unit")).await;

    let now = fixed_now();
    common::insert_log(&db.proxy, &card_id, "u1", 3, now - chrono::Duration::hours(3)).await;
    common::insert_log(&db.proxy, &card_id, "u1", 4, now - chrono::Duration::hours(2)).await;
    common::insert_log(&db.proxy, &card_id, "u1", 3, now - chrono::Duration::hours(1)).await;
    common::insert_log(&db.proxy, &card_id, "u1", 3, now - days(1)).await;

    let s = stats::get_stats(&db.proxy, "u1", now).await.unwrap();
    assert_eq!(s.reviewed_today, 3);
    assert_eq!(s.retention_rate, Some(100));
}

#[tokio::test]
async fn retention_rate_rounds_the_remembered_share() {
    let db = setup().await;
    seed_user(&db.proxy, "u1").await;
    seed_content_unit(&db.proxy, "u1", "unit", 0, &[]).await;
    let card_id = common::insert_card(&db.proxy, &CardFixture::new("u1", "unit")).await;

    let now = fixed_now();
    for (offset_hours, rating) in [(1i64, 3i64), (2, 1), (3, 1)] {
        common::insert_log(
            &db.proxy,
            &card_id,
            "u1",
            rating,
            now - chrono::Duration::hours(offset_hours),
        )
        .await;
    }

    let s = stats::get_stats(&db.proxy, "u1", now).await.unwrap();
    assert_eq!(s.reviewed_today, 3);
    assert_eq!(s.retention_rate, Some(33));
}

#[tokio::test]
async fn logs_at_utc_midnight_belong_to_the_new_day() {
    let db = setup().await;
    seed_user(&db.proxy, "u1").await;
    seed_content_unit(&db.proxy, "u1", "unit", 0, &[]).await;
    let card_id = common::insert_card(&db.proxy, &CardFixture::new("u1", "unit")).await;

    let midnight = fixed_now().date().and_hms_opt(0, 0, 0).unwrap();
    common::insert_log(&db.proxy, &card_id, "u1", 3, midnight).await;
    common::insert_log(&db.proxy, &card_id, "u1", 3, midnight - chrono::Duration::seconds(1))
        .await;

    let s = stats::get_stats(&db.proxy, "u1", fixed_now()).await.unwrap();
    assert_eq!(s.reviewed_today, 1);
}

#[tokio::test]
async fn state_counts_group_learning_with_relearning() {
    let db = setup().await;
    seed_user(&db.proxy, "u1").await;

    let cases: [(&str, &str, i64); 5] = [
        ("n1", "NEW", 1),
        ("l1", "LEARNING", -1),
        ("r1", "RELEARNING", -1),
        ("v1", "REVIEW", -1),
        ("v2", "REVIEW", 1),
    ];
    for (i, (id, state, due_offset_days)) in cases.into_iter().enumerate() {
        let unit = format!("unit-{i}");
        seed_content_unit(&db.proxy, "u1", &unit, i as i64, &[]).await;
        let mut fixture = CardFixture::new("u1", &unit);
        fixture.id = id.to_string();
        fixture.state = state;
        fixture.due = fixed_now() + days(due_offset_days);
        common::insert_card(&db.proxy, &fixture).await;
    }

    let s = stats::get_stats(&db.proxy, "u1", fixed_now()).await.unwrap();
    assert_eq!(s.total_cards, 5);
    assert_eq!(s.new_cards, 1);
    assert_eq!(s.learning_cards, 2);
    assert_eq!(s.review_cards, 2);
    // due now: l1, r1, v1 are past due and not NEW
    assert_eq!(s.due_now, 3);
}

#[tokio::test]
async fn stats_are_scoped_to_the_caller() {
    let db = setup().await;
    seed_user(&db.proxy, "u1").await;
    seed_user(&db.proxy, "u2").await;
    seed_content_unit(&db.proxy, "u2", "theirs", 0, &[]).await;
    let card_id = common::insert_card(&db.proxy, &CardFixture::new("u2", "theirs")).await;
    common::insert_log(&db.proxy, &card_id, "u2", 4, fixed_now()).await;

    let s = stats::get_stats(&db.proxy, "u1", fixed_now()).await.unwrap();
    assert_eq!(s.total_cards, 0);
    assert_eq!(s.reviewed_today, 0);
    assert_eq!(s.retention_rate, None);
}
