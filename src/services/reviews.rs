//! Review transaction and single-step undo.
//!
//! `submit_review` is the only writer that advances a card; `undo_review`
//! is the only writer that moves one back. Each runs as one SQLite
//! transaction so the card state and its log never diverge.

use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

use crate::db::DatabaseProxy;
use crate::services::card_states::{
    self, naive_to_iso, CardStateRecord, CardStateSnapshot,
};
use crate::services::scheduler::{self, CardPhase, Rating, SchedulerParams};

/// Immutable audit record, one per review. The snapshot fields hold the
/// card's *pre-review* values; undo restores from the caller's snapshot
/// and deletes this row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewLogRecord {
    pub id: String,
    pub card_state_id: String,
    pub user_id: String,
    pub rating: i64,
    pub state: CardPhase,
    pub scheduled_days: f64,
    pub elapsed_days: f64,
    pub stability: f64,
    pub difficulty: f64,
    pub reviewed_at: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub card_state: CardStateRecord,
    pub review_log_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("invalid rating: {0} (expected 1-4)")]
    InvalidRating(i64),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("review log does not belong to this card state")]
    Mismatch,
    #[error("a newer review exists; undo refused")]
    StaleLog,
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

/// Applies one review atomically: schedule the next step, advance the card
/// state, append the pre-review snapshot to the log.
pub async fn submit_review(
    proxy: &DatabaseProxy,
    params: &SchedulerParams,
    user_id: &str,
    card_state_id: &str,
    rating_value: i64,
    now: NaiveDateTime,
) -> Result<ReviewOutcome, ReviewError> {
    let rating =
        Rating::from_value(rating_value).ok_or(ReviewError::InvalidRating(rating_value))?;

    let mut tx = proxy.pool().begin().await?;

    let row = sqlx::query(
        r#"
        SELECT "id","userId","state","stability","difficulty","due","lastReview",
               "reps","lapses","scheduledDays","elapsedDays"
        FROM "card_states" WHERE "id" = $1 LIMIT 1
        "#,
    )
    .bind(card_state_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        return Err(ReviewError::NotFound("card state does not exist".to_string()));
    };

    let owner: String = row.try_get("userId").unwrap_or_default();
    if owner != user_id {
        return Err(ReviewError::Unauthorized(
            "card state belongs to another user".to_string(),
        ));
    }

    let prev_state_text: String = row.try_get("state").unwrap_or_else(|_| "NEW".to_string());
    let prev_phase = CardPhase::parse(&prev_state_text).unwrap_or(CardPhase::New);
    let prev_stability: f64 = row.try_get("stability").unwrap_or(0.0);
    let prev_difficulty: f64 = row.try_get("difficulty").unwrap_or(0.0);
    let prev_last_review: Option<NaiveDateTime> =
        row.try_get::<Option<NaiveDateTime>, _>("lastReview").ok().flatten();
    let prev_reps: i64 = row.try_get("reps").unwrap_or(0);
    let prev_lapses: i64 = row.try_get("lapses").unwrap_or(0);
    let prev_scheduled_days: f64 = row.try_get("scheduledDays").unwrap_or(0.0);
    let prev_elapsed_days: f64 = row.try_get("elapsedDays").unwrap_or(0.0);

    let snapshot = scheduler::MemorySnapshot {
        phase: prev_phase,
        stability: prev_stability,
        difficulty: prev_difficulty,
        last_review: prev_last_review,
    };
    let next = scheduler::schedule(params, &snapshot, rating, now);

    let is_lapse = prev_phase == CardPhase::Review && next.phase == CardPhase::Relearning;
    let next_lapses = if is_lapse { prev_lapses + 1 } else { prev_lapses };

    sqlx::query(
        r#"
        UPDATE "card_states" SET
          "state" = $1, "stability" = $2, "difficulty" = $3, "due" = $4,
          "lastReview" = $5, "reps" = $6, "lapses" = $7,
          "scheduledDays" = $8, "elapsedDays" = $9, "updatedAt" = $5
        WHERE "id" = $10
        "#,
    )
    .bind(next.phase.as_str())
    .bind(next.stability)
    .bind(next.difficulty)
    .bind(next.due)
    .bind(now)
    .bind(prev_reps + 1)
    .bind(next_lapses)
    .bind(next.scheduled_days)
    .bind(next.elapsed_days)
    .bind(card_state_id)
    .execute(&mut *tx)
    .await?;

    let log_id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO "review_logs"
          ("id","cardStateId","userId","rating","state","scheduledDays",
           "elapsedDays","stability","difficulty","reviewedAt","createdAt")
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
        "#,
    )
    .bind(&log_id)
    .bind(card_state_id)
    .bind(user_id)
    .bind(rating.value())
    .bind(prev_phase.as_str())
    .bind(prev_scheduled_days)
    .bind(prev_elapsed_days)
    .bind(prev_stability)
    .bind(prev_difficulty)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::debug!(
        card_state_id,
        rating = rating.value(),
        from = prev_phase.as_str(),
        to = next.phase.as_str(),
        lapse = is_lapse,
        "review applied"
    );

    let record = card_states::load_card_state(proxy, card_state_id)
        .await?
        .ok_or_else(|| ReviewError::NotFound("card state vanished".to_string()))?;

    Ok(ReviewOutcome {
        card_state: record,
        review_log_id: log_id,
    })
}

/// Rolls back the most recent review on a card, guarded by log identity.
///
/// The supplied `review_log_id` acts as an optimistic-concurrency token:
/// if another session reviewed the card after the caller captured its
/// snapshot, the current log no longer matches and the undo fails with
/// `StaleLog` instead of clobbering the newer review.
pub async fn undo_review(
    proxy: &DatabaseProxy,
    user_id: &str,
    card_state_id: &str,
    snapshot: &CardStateSnapshot,
    review_log_id: Option<&str>,
) -> Result<(), ReviewError> {
    let mut tx = proxy.pool().begin().await?;

    let owner: Option<String> =
        sqlx::query_scalar(r#"SELECT "userId" FROM "card_states" WHERE "id" = $1 LIMIT 1"#)
            .bind(card_state_id)
            .fetch_optional(&mut *tx)
            .await?;

    let Some(owner) = owner else {
        return Err(ReviewError::NotFound("card state does not exist".to_string()));
    };
    if owner != user_id {
        return Err(ReviewError::Unauthorized(
            "card state belongs to another user".to_string(),
        ));
    }

    let current = sqlx::query(
        r#"
        SELECT "id","cardStateId" FROM "review_logs"
        WHERE "cardStateId" = $1
        ORDER BY "reviewedAt" DESC, "createdAt" DESC, "id" DESC
        LIMIT 1
        "#,
    )
    .bind(card_state_id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(log_id) = review_log_id {
        let claimed = sqlx::query(
            r#"SELECT "cardStateId" FROM "review_logs" WHERE "id" = $1 LIMIT 1"#,
        )
        .bind(log_id)
        .fetch_optional(&mut *tx)
        .await?;

        match claimed {
            Some(row) => {
                let target: String = row.try_get("cardStateId").unwrap_or_default();
                if target != card_state_id {
                    return Err(ReviewError::Mismatch);
                }
            }
            // The claimed log is gone: someone else already undid it, or a
            // newer review rotated it out. Either way the snapshot is stale.
            None => return Err(ReviewError::StaleLog),
        }

        let current_id = current
            .as_ref()
            .map(|row| row.try_get::<String, _>("id").unwrap_or_default());
        if current_id.as_deref() != Some(log_id) {
            return Err(ReviewError::StaleLog);
        }
    }

    sqlx::query(
        r#"
        UPDATE "card_states" SET
          "state" = $1, "stability" = $2, "difficulty" = $3, "due" = $4,
          "lastReview" = $5, "reps" = $6, "lapses" = $7,
          "scheduledDays" = $8, "elapsedDays" = $9, "updatedAt" = $10
        WHERE "id" = $11
        "#,
    )
    .bind(snapshot.state.as_str())
    .bind(snapshot.stability)
    .bind(snapshot.difficulty)
    .bind(snapshot.due)
    .bind(snapshot.last_review)
    .bind(snapshot.reps)
    .bind(snapshot.lapses)
    .bind(snapshot.scheduled_days)
    .bind(snapshot.elapsed_days)
    .bind(chrono::Utc::now().naive_utc())
    .bind(card_state_id)
    .execute(&mut *tx)
    .await?;

    if let Some(row) = current {
        let current_id: String = row.try_get("id").unwrap_or_default();
        sqlx::query(r#"DELETE FROM "review_logs" WHERE "id" = $1"#)
            .bind(&current_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    tracing::debug!(card_state_id, "review undone");
    Ok(())
}

pub async fn count_logs_for_card(
    proxy: &DatabaseProxy,
    card_state_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(r#"SELECT COUNT(*) FROM "review_logs" WHERE "cardStateId" = $1"#)
        .bind(card_state_id)
        .fetch_one(proxy.pool())
        .await
}

pub async fn list_logs_for_card(
    proxy: &DatabaseProxy,
    user_id: &str,
    card_state_id: &str,
) -> Result<Vec<ReviewLogRecord>, ReviewError> {
    let rows = sqlx::query(
        r#"
        SELECT "id","cardStateId","userId","rating","state","scheduledDays",
               "elapsedDays","stability","difficulty","reviewedAt","createdAt"
        FROM "review_logs"
        WHERE "cardStateId" = $1 AND "userId" = $2
        ORDER BY "reviewedAt" DESC, "createdAt" DESC, "id" DESC
        "#,
    )
    .bind(card_state_id)
    .bind(user_id)
    .fetch_all(proxy.pool())
    .await?;

    Ok(rows.iter().map(map_log_row).collect())
}

fn map_log_row(row: &sqlx::sqlite::SqliteRow) -> ReviewLogRecord {
    let state_text: String = row.try_get("state").unwrap_or_else(|_| "NEW".to_string());
    let reviewed_at: NaiveDateTime = row
        .try_get("reviewedAt")
        .unwrap_or_else(|_| chrono::Utc::now().naive_utc());
    let created_at: NaiveDateTime = row
        .try_get("createdAt")
        .unwrap_or_else(|_| chrono::Utc::now().naive_utc());

    ReviewLogRecord {
        id: row.try_get("id").unwrap_or_default(),
        card_state_id: row.try_get("cardStateId").unwrap_or_default(),
        user_id: row.try_get("userId").unwrap_or_default(),
        rating: row.try_get("rating").unwrap_or(0),
        state: CardPhase::parse(&state_text).unwrap_or(CardPhase::New),
        scheduled_days: row.try_get("scheduledDays").unwrap_or(0.0),
        elapsed_days: row.try_get("elapsedDays").unwrap_or(0.0),
        stability: row.try_get("stability").unwrap_or(0.0),
        difficulty: row.try_get("difficulty").unwrap_or(0.0),
        reviewed_at: naive_to_iso(reviewed_at),
        created_at: naive_to_iso(created_at),
    }
}
