//! Session statistics: today's counts and retention rate.
//!
//! "Today" is the current UTC calendar day; timestamps are stored naive
//! UTC, so the boundary is UTC midnight on both ends.

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use sqlx::Row;

use crate::db::DatabaseProxy;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyStats {
    pub total_cards: i64,
    pub new_cards: i64,
    pub learning_cards: i64,
    pub review_cards: i64,
    pub due_now: i64,
    pub reviewed_today: i64,
    pub retention_rate: Option<i64>,
}

pub async fn get_stats(
    proxy: &DatabaseProxy,
    user_id: &str,
    now: NaiveDateTime,
) -> Result<StudyStats, sqlx::Error> {
    let pool = proxy.pool();

    let counts = sqlx::query(
        r#"
        SELECT
          COUNT(*) as "total",
          SUM(CASE WHEN "state" = 'NEW' THEN 1 ELSE 0 END) as "new",
          SUM(CASE WHEN "state" IN ('LEARNING','RELEARNING') THEN 1 ELSE 0 END) as "learning",
          SUM(CASE WHEN "state" = 'REVIEW' THEN 1 ELSE 0 END) as "review",
          SUM(CASE WHEN "state" != 'NEW' AND "suspended" = 0 AND "due" <= $2 THEN 1 ELSE 0 END) as "dueNow"
        FROM "card_states"
        WHERE "userId" = $1
        "#,
    )
    .bind(user_id)
    .bind(now)
    .fetch_one(pool)
    .await?;

    let day_start = now.date().and_hms_opt(0, 0, 0).unwrap_or(now);
    let day_end = day_start + Duration::days(1);

    let today = sqlx::query(
        r#"
        SELECT
          COUNT(*) as "reviewed",
          SUM(CASE WHEN "rating" >= 3 THEN 1 ELSE 0 END) as "remembered"
        FROM "review_logs"
        WHERE "userId" = $1 AND "reviewedAt" >= $2 AND "reviewedAt" < $3
        "#,
    )
    .bind(user_id)
    .bind(day_start)
    .bind(day_end)
    .fetch_one(pool)
    .await?;

    let reviewed_today: i64 = today.try_get("reviewed").unwrap_or(0);
    let remembered_today: i64 = today.try_get("remembered").unwrap_or(0);

    let retention_rate = if reviewed_today > 0 {
        Some((remembered_today as f64 / reviewed_today as f64 * 100.0).round() as i64)
    } else {
        None
    };

    Ok(StudyStats {
        total_cards: counts.try_get("total").unwrap_or(0),
        new_cards: counts.try_get("new").unwrap_or(0),
        learning_cards: counts.try_get("learning").unwrap_or(0),
        review_cards: counts.try_get("review").unwrap_or(0),
        due_now: counts.try_get("dueNow").unwrap_or(0),
        reviewed_today,
        retention_rate,
    })
}
