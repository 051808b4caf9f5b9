use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row, Sqlite};
use uuid::Uuid;

use crate::db::DatabaseProxy;
use crate::services::scheduler::{CardPhase, MemorySnapshot};

pub const MAX_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "FORWARD",
            Self::Reverse => "REVERSE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "FORWARD" => Some(Self::Forward),
            "REVERSE" => Some(Self::Reverse),
            _ => None,
        }
    }
}

/// One scheduling record per (content unit, direction, owner).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardStateRecord {
    pub id: String,
    pub user_id: String,
    pub content_unit_id: String,
    pub direction: Direction,
    pub state: CardPhase,
    pub stability: f64,
    pub difficulty: f64,
    pub due: String,
    pub last_review: Option<String>,
    pub reps: i64,
    pub lapses: i64,
    pub scheduled_days: f64,
    pub elapsed_days: f64,
    pub suspended: bool,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip)]
    pub due_at: NaiveDateTime,
    #[serde(skip)]
    pub last_review_at: Option<NaiveDateTime>,
}

impl CardStateRecord {
    pub fn memory_snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            phase: self.state,
            stability: self.stability,
            difficulty: self.difficulty,
            last_review: self.last_review_at,
        }
    }
}

/// The nine fields a caller must capture before `submit_review` to be able
/// to undo it. Restored verbatim by the undo coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardStateSnapshot {
    pub state: CardPhase,
    pub stability: f64,
    pub difficulty: f64,
    #[serde(with = "iso_datetime")]
    pub due: NaiveDateTime,
    #[serde(with = "iso_datetime_opt", default)]
    pub last_review: Option<NaiveDateTime>,
    pub reps: i64,
    pub lapses: i64,
    pub scheduled_days: f64,
    pub elapsed_days: f64,
}

impl CardStateSnapshot {
    pub fn capture(record: &CardStateRecord) -> Self {
        Self {
            state: record.state,
            stability: record.stability,
            difficulty: record.difficulty,
            due: record.due_at,
            last_review: record.last_review_at,
            reps: record.reps,
            lapses: record.lapses,
            scheduled_days: record.scheduled_days,
            elapsed_days: record.elapsed_days,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CardStateError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

const CARD_STATE_COLUMNS: &str = r#"
  "id","userId","contentUnitId","direction","state","stability","difficulty",
  "due","lastReview","reps","lapses","scheduledDays","elapsedDays","suspended",
  "createdAt","updatedAt"
"#;

/// Lazily creates the scheduling record for one (content unit, direction)
/// pair. Idempotent: an existing record is returned untouched.
pub async fn create_or_get_card_state(
    proxy: &DatabaseProxy,
    user_id: &str,
    content_unit_id: &str,
    direction: Direction,
    now: NaiveDateTime,
) -> Result<CardStateRecord, CardStateError> {
    let records =
        ensure_card_states(proxy, user_id, content_unit_id, &[direction], now).await?;
    records
        .into_iter()
        .find(|r| r.direction == direction)
        .ok_or_else(|| CardStateError::NotFound("card state missing after create".to_string()))
}

/// Ensures scheduling records exist for every requested direction of a
/// content unit, creating missing ones in NEW.
pub async fn ensure_card_states(
    proxy: &DatabaseProxy,
    user_id: &str,
    content_unit_id: &str,
    directions: &[Direction],
    now: NaiveDateTime,
) -> Result<Vec<CardStateRecord>, CardStateError> {
    if directions.is_empty() {
        return Err(CardStateError::Validation(
            "directions must be a non-empty array".to_string(),
        ));
    }

    ensure_unit_access(proxy, user_id, content_unit_id).await?;

    let pool = proxy.pool();
    let mut unique: Vec<Direction> = Vec::new();
    for dir in directions {
        if !unique.contains(dir) {
            unique.push(*dir);
        }
    }

    for dir in &unique {
        sqlx::query(
            r#"
            INSERT INTO "card_states"
              ("id","userId","contentUnitId","direction","due","createdAt","updatedAt")
            VALUES ($1, $2, $3, $4, $5, $5, $5)
            ON CONFLICT ("userId","contentUnitId","direction") DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(content_unit_id)
        .bind(dir.as_str())
        .bind(now)
        .execute(pool)
        .await?;
    }

    let mut qb = QueryBuilder::<Sqlite>::new("SELECT ");
    qb.push(CARD_STATE_COLUMNS);
    qb.push(r#" FROM "card_states" WHERE "userId" = "#);
    qb.push_bind(user_id);
    qb.push(r#" AND "contentUnitId" = "#);
    qb.push_bind(content_unit_id);
    qb.push(r#" AND "direction" IN ("#);
    {
        let mut sep = qb.separated(", ");
        for dir in &unique {
            sep.push_bind(dir.as_str());
        }
    }
    qb.push(r#") ORDER BY "direction" ASC"#);

    let rows = qb.build().fetch_all(pool).await?;
    Ok(rows.iter().map(map_row).collect())
}

/// Loads a card state by id without an ownership filter; callers decide
/// between NotFound and Unauthorized.
pub async fn load_card_state(
    proxy: &DatabaseProxy,
    card_state_id: &str,
) -> Result<Option<CardStateRecord>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {CARD_STATE_COLUMNS} FROM "card_states" WHERE "id" = $1 LIMIT 1"#
    );
    let row = sqlx::query(&sql)
        .bind(card_state_id)
        .fetch_optional(proxy.pool())
        .await?;
    Ok(row.as_ref().map(map_row))
}

/// Loads a card state the caller owns, distinguishing missing from
/// foreign records.
pub async fn get_owned_card_state(
    proxy: &DatabaseProxy,
    user_id: &str,
    card_state_id: &str,
) -> Result<CardStateRecord, CardStateError> {
    let record = load_card_state(proxy, card_state_id)
        .await?
        .ok_or_else(|| CardStateError::NotFound("card state does not exist".to_string()))?;
    if record.user_id != user_id {
        return Err(CardStateError::Unauthorized(
            "card state belongs to another user".to_string(),
        ));
    }
    Ok(record)
}

/// Explicit cascade invoked by the content collaborator when a block is
/// deleted: review logs first, then the card states themselves, in one
/// transaction. Returns the number of deleted card states.
pub async fn delete_for_content_unit(
    proxy: &DatabaseProxy,
    user_id: &str,
    content_unit_id: &str,
) -> Result<u64, CardStateError> {
    ensure_unit_access(proxy, user_id, content_unit_id).await?;

    let mut tx = proxy.pool().begin().await?;

    sqlx::query(
        r#"
        DELETE FROM "review_logs"
        WHERE "cardStateId" IN (
          SELECT "id" FROM "card_states"
          WHERE "userId" = $1 AND "contentUnitId" = $2
        )
        "#,
    )
    .bind(user_id)
    .bind(content_unit_id)
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query(
        r#"DELETE FROM "card_states" WHERE "userId" = $1 AND "contentUnitId" = $2"#,
    )
    .bind(user_id)
    .bind(content_unit_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(result.rows_affected())
}

/// Owner check against the content unit table. Unknown units are NotFound,
/// foreign units are Unauthorized.
async fn ensure_unit_access(
    proxy: &DatabaseProxy,
    user_id: &str,
    content_unit_id: &str,
) -> Result<(), CardStateError> {
    let row = sqlx::query(r#"SELECT "userId" FROM "content_units" WHERE "id" = $1 LIMIT 1"#)
        .bind(content_unit_id)
        .fetch_optional(proxy.pool())
        .await?;

    let Some(row) = row else {
        return Err(CardStateError::NotFound(
            "content unit does not exist".to_string(),
        ));
    };

    let owner: String = row.try_get("userId").unwrap_or_default();
    if owner != user_id {
        return Err(CardStateError::Unauthorized(
            "no access to this content unit".to_string(),
        ));
    }
    Ok(())
}

pub fn map_row(row: &sqlx::sqlite::SqliteRow) -> CardStateRecord {
    let state_text: String = row.try_get("state").unwrap_or_else(|_| "NEW".to_string());
    let direction_text: String = row
        .try_get("direction")
        .unwrap_or_else(|_| "FORWARD".to_string());
    let due_at: NaiveDateTime = row
        .try_get("due")
        .unwrap_or_else(|_| Utc::now().naive_utc());
    let last_review_at: Option<NaiveDateTime> = row.try_get("lastReview").ok().flatten();
    let created_at: NaiveDateTime = row
        .try_get("createdAt")
        .unwrap_or_else(|_| Utc::now().naive_utc());
    let updated_at: NaiveDateTime = row
        .try_get("updatedAt")
        .unwrap_or_else(|_| Utc::now().naive_utc());

    CardStateRecord {
        id: row.try_get("id").unwrap_or_default(),
        user_id: row.try_get("userId").unwrap_or_default(),
        content_unit_id: row.try_get("contentUnitId").unwrap_or_default(),
        direction: Direction::parse(&direction_text).unwrap_or(Direction::Forward),
        state: CardPhase::parse(&state_text).unwrap_or(CardPhase::New),
        stability: row.try_get("stability").unwrap_or(0.0),
        difficulty: row.try_get("difficulty").unwrap_or(0.0),
        due: naive_to_iso(due_at),
        last_review: last_review_at.map(naive_to_iso),
        reps: row.try_get("reps").unwrap_or(0),
        lapses: row.try_get("lapses").unwrap_or(0),
        scheduled_days: row.try_get("scheduledDays").unwrap_or(0.0),
        elapsed_days: row.try_get("elapsedDays").unwrap_or(0.0),
        suspended: row.try_get::<i64, _>("suspended").unwrap_or(0) != 0,
        created_at: naive_to_iso(created_at),
        updated_at: naive_to_iso(updated_at),
        due_at,
        last_review_at,
    }
}

pub fn naive_to_iso(value: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(value, Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses either an RFC3339 timestamp (the wire format this engine emits)
/// or a bare naive datetime.
pub fn parse_iso_datetime(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    value.parse::<NaiveDateTime>().ok()
}

mod iso_datetime {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&super::naive_to_iso(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(de)?;
        super::parse_iso_datetime(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }
}

mod iso_datetime_opt {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => ser.serialize_str(&super::naive_to_iso(*dt)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw = Option::<String>::deserialize(de)?;
        match raw {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => super::parse_iso_datetime(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_round_trips() {
        for dir in [Direction::Forward, Direction::Reverse] {
            assert_eq!(Direction::parse(dir.as_str()), Some(dir));
        }
        assert_eq!(Direction::parse("SIDEWAYS"), None);
    }

    #[test]
    fn snapshot_serde_accepts_wire_timestamps() {
        let json = r#"{
            "state": "REVIEW",
            "stability": 12.5,
            "difficulty": 4.2,
            "due": "2025-06-15T12:00:00.000Z",
            "lastReview": "2025-06-10T08:30:00.000Z",
            "reps": 3,
            "lapses": 1,
            "scheduledDays": 14.0,
            "elapsedDays": 5.1
        }"#;
        let snapshot: CardStateSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.state, CardPhase::Review);
        assert_eq!(snapshot.reps, 3);
        assert!(snapshot.last_review.is_some());

        let round = serde_json::to_string(&snapshot).unwrap();
        assert!(round.contains("2025-06-15T12:00:00.000Z"));
    }
}
