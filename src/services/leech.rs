//! Chronically-forgotten card detection and bulk suspension.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::db::DatabaseProxy;
use crate::services::card_states::{self, CardStateRecord, MAX_BATCH_SIZE};

/// A card is a leech once it crosses either threshold.
pub const LAPSE_THRESHOLD: i64 = 7;
pub const RETENTION_THRESHOLD: f64 = 50.0;

/// Retention is judged over this many most-recent logs, and only once a
/// card has accumulated enough of them to make the rate meaningful.
pub const RECENT_LOG_WINDOW: i64 = 10;
pub const MIN_LOGS_FOR_RETENTION: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeechReason {
    HighLapses,
    LowRetention,
    Both,
}

impl LeechReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HighLapses => "High lapse count",
            Self::LowRetention => "Low retention",
            Self::Both => "High lapse count; Low retention",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeechCard {
    pub card_state: CardStateRecord,
    pub leech_reason: String,
    pub suspended: bool,
    pub recent_retention: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeechStats {
    pub total_leeches: i64,
    pub suspended_count: i64,
    pub high_lapses_count: i64,
    pub low_retention_count: i64,
}

/// Partial-success batch result: unknown or foreign ids are skipped, never
/// fatal for the rest of the batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSuspendResult {
    pub succeeded: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LeechError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

/// Pure classification: lapse count past the threshold, or recent
/// retention under it. `recent_retention` is a percentage, `None` when the
/// card has too few logs to judge.
pub fn classify_leech(lapses: i64, recent_retention: Option<f64>) -> Option<LeechReason> {
    let high_lapses = lapses > LAPSE_THRESHOLD;
    let low_retention = matches!(recent_retention, Some(r) if r < RETENTION_THRESHOLD);

    match (high_lapses, low_retention) {
        (true, true) => Some(LeechReason::Both),
        (true, false) => Some(LeechReason::HighLapses),
        (false, true) => Some(LeechReason::LowRetention),
        (false, false) => None,
    }
}

pub fn is_leech(lapses: i64, recent_retention: Option<f64>) -> bool {
    classify_leech(lapses, recent_retention).is_some()
}

/// All of the caller's leech-classified cards, annotated with the reason.
pub async fn list_leech_cards(
    proxy: &DatabaseProxy,
    user_id: &str,
) -> Result<Vec<LeechCard>, LeechError> {
    let candidates = load_classified(proxy, user_id).await?;
    Ok(candidates
        .into_iter()
        .filter_map(|(record, retention)| {
            classify_leech(record.lapses, retention).map(|reason| LeechCard {
                leech_reason: reason.as_str().to_string(),
                suspended: record.suspended,
                recent_retention: retention,
                card_state: record,
            })
        })
        .collect())
}

/// One-pass aggregate over the caller's cards.
pub async fn get_leech_stats(
    proxy: &DatabaseProxy,
    user_id: &str,
) -> Result<LeechStats, LeechError> {
    let candidates = load_classified(proxy, user_id).await?;

    let mut stats = LeechStats {
        total_leeches: 0,
        suspended_count: 0,
        high_lapses_count: 0,
        low_retention_count: 0,
    };

    for (record, retention) in &candidates {
        let Some(reason) = classify_leech(record.lapses, *retention) else {
            continue;
        };
        stats.total_leeches += 1;
        if record.suspended {
            stats.suspended_count += 1;
        }
        match reason {
            LeechReason::HighLapses => stats.high_lapses_count += 1,
            LeechReason::LowRetention => stats.low_retention_count += 1,
            LeechReason::Both => {
                stats.high_lapses_count += 1;
                stats.low_retention_count += 1;
            }
        }
    }

    Ok(stats)
}

/// Sets the suspended flag on every matching owned card. Ids that do not
/// exist or belong to someone else land in `skipped`.
pub async fn bulk_suspend_cards(
    proxy: &DatabaseProxy,
    user_id: &str,
    card_state_ids: &[String],
    suspend: bool,
) -> Result<BulkSuspendResult, LeechError> {
    if card_state_ids.is_empty() {
        return Ok(BulkSuspendResult {
            succeeded: Vec::new(),
            skipped: Vec::new(),
        });
    }
    if card_state_ids.len() > MAX_BATCH_SIZE {
        return Err(LeechError::Validation(format!(
            "cardStateIds array exceeds maximum size of {MAX_BATCH_SIZE}"
        )));
    }

    let mut requested: Vec<String> = Vec::new();
    for id in card_state_ids {
        let trimmed = id.trim().to_string();
        if !trimmed.is_empty() && !requested.contains(&trimmed) {
            requested.push(trimmed);
        }
    }

    let mut qb = QueryBuilder::<Sqlite>::new(
        r#"SELECT "id" FROM "card_states" WHERE "userId" = "#,
    );
    qb.push_bind(user_id.to_string());
    qb.push(r#" AND "id" IN ("#);
    {
        let mut sep = qb.separated(", ");
        for id in &requested {
            sep.push_bind(id.clone());
        }
    }
    qb.push(")");

    let owned: HashSet<String> = qb
        .build()
        .fetch_all(proxy.pool())
        .await?
        .iter()
        .map(|row| row.try_get::<String, _>("id").unwrap_or_default())
        .collect();

    if !owned.is_empty() {
        let mut update = QueryBuilder::<Sqlite>::new(r#"UPDATE "card_states" SET "suspended" = "#);
        update.push_bind(if suspend { 1i64 } else { 0i64 });
        update.push(r#", "updatedAt" = "#);
        update.push_bind(chrono::Utc::now().naive_utc());
        update.push(r#" WHERE "id" IN ("#);
        {
            let mut sep = update.separated(", ");
            for id in &owned {
                sep.push_bind(id.clone());
            }
        }
        update.push(")");
        update.build().execute(proxy.pool()).await?;
    }

    let mut succeeded = Vec::new();
    let mut skipped = Vec::new();
    for id in requested {
        if owned.contains(&id) {
            succeeded.push(id);
        } else {
            skipped.push(id);
        }
    }

    Ok(BulkSuspendResult { succeeded, skipped })
}

/// Loads every card of the user together with its recent retention rate.
/// Recent logs are gathered with one window-function query instead of a
/// per-card roundtrip.
async fn load_classified(
    proxy: &DatabaseProxy,
    user_id: &str,
) -> Result<Vec<(CardStateRecord, Option<f64>)>, LeechError> {
    let card_rows = sqlx::query(
        r#"
        SELECT "id","userId","contentUnitId","direction","state","stability","difficulty",
               "due","lastReview","reps","lapses","scheduledDays","elapsedDays","suspended",
               "createdAt","updatedAt"
        FROM "card_states" WHERE "userId" = $1
        "#,
    )
    .bind(user_id)
    .fetch_all(proxy.pool())
    .await?;

    let log_rows = sqlx::query(
        r#"
        SELECT "cardStateId", "rating" FROM (
          SELECT "cardStateId", "rating",
                 ROW_NUMBER() OVER (
                   PARTITION BY "cardStateId"
                   ORDER BY "reviewedAt" DESC, "createdAt" DESC, "id" DESC
                 ) AS "rn"
          FROM "review_logs" WHERE "userId" = $1
        ) WHERE "rn" <= $2
        "#,
    )
    .bind(user_id)
    .bind(RECENT_LOG_WINDOW)
    .fetch_all(proxy.pool())
    .await?;

    let mut recent_ratings: HashMap<String, Vec<i64>> = HashMap::new();
    for row in &log_rows {
        let card_id: String = row.try_get("cardStateId").unwrap_or_default();
        let rating: i64 = row.try_get("rating").unwrap_or(0);
        recent_ratings.entry(card_id).or_default().push(rating);
    }

    Ok(card_rows
        .iter()
        .map(|row| {
            let record = card_states::map_row(row);
            let retention = recent_ratings
                .get(&record.id)
                .and_then(|ratings| recent_retention(ratings));
            (record, retention)
        })
        .collect())
}

/// Percentage of remembered reviews (rating >= Good) over the recent
/// window; `None` below the minimum sample size.
pub fn recent_retention(ratings: &[i64]) -> Option<f64> {
    if ratings.len() < MIN_LOGS_FOR_RETENTION {
        return None;
    }
    let remembered = ratings.iter().filter(|&&r| r >= 3).count();
    Some(remembered as f64 / ratings.len() as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_lapse_count_flags_a_leech() {
        assert_eq!(classify_leech(8, None), Some(LeechReason::HighLapses));
        assert_eq!(classify_leech(7, None), None);
        assert_eq!(classify_leech(0, None), None);
    }

    #[test]
    fn low_retention_flags_a_leech() {
        assert_eq!(classify_leech(0, Some(40.0)), Some(LeechReason::LowRetention));
        assert_eq!(classify_leech(0, Some(50.0)), None);
        assert_eq!(classify_leech(8, Some(25.0)), Some(LeechReason::Both));
    }

    #[test]
    fn retention_needs_a_minimum_sample() {
        assert_eq!(recent_retention(&[1, 1, 1]), None);
        assert_eq!(recent_retention(&[3, 3, 1, 1]), Some(50.0));
        assert_eq!(recent_retention(&[4, 3, 3, 3]), Some(100.0));
        assert_eq!(recent_retention(&[1, 2, 1, 2]), Some(0.0));
    }

    #[test]
    fn leech_reason_strings_are_stable() {
        assert_eq!(LeechReason::HighLapses.as_str(), "High lapse count");
        assert_eq!(LeechReason::LowRetention.as_str(), "Low retention");
        assert_eq!(
            LeechReason::Both.as_str(),
            "High lapse count; Low retention"
        );
    }
}
