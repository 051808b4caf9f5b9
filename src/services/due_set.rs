//! Session selection: which cards to show, and in what order.
//!
//! Due ranking is computed live from the scheduler's forgetting curve, not
//! from stored values; a card's urgency depends on the clock at query time.

use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::db::DatabaseProxy;
use crate::services::card_states::{self, naive_to_iso, CardStateRecord, Direction};
use crate::services::scheduler::{self, CardPhase, PreviewIntervals, SchedulerParams};

#[derive(Debug, thiserror::Error)]
pub enum DueSetError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

/// A card as presented to a review session. `exam_priority` is advisory
/// annotation from the exam collaborator and never affects ordering.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCard {
    pub card_state: CardStateRecord,
    pub retrievability: f64,
    pub exam_priority: bool,
    pub exam_name: Option<String>,
    pub exam_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_intervals: Option<PreviewIntervals>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnSession {
    pub due_cards: Vec<SessionCard>,
    pub new_cards: Vec<SessionCard>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketResult {
    pub cards: Vec<CardStateRecord>,
    pub total: i64,
}

/// Cards past due, most fragile first: ascending live retrievability,
/// ties broken by lower stability, then earlier due date. The limit is
/// applied only after the full set is sorted.
pub async fn get_due_cards(
    proxy: &DatabaseProxy,
    params: &SchedulerParams,
    user_id: &str,
    now: NaiveDateTime,
    limit: Option<i64>,
) -> Result<Vec<SessionCard>, DueSetError> {
    let limit = validate_limit(limit)?;
    let rows = fetch_session_rows(proxy, user_id, SessionFilter::Due, now).await?;

    let mut cards: Vec<SessionCard> = rows
        .into_iter()
        .map(|row| {
            let r = scheduler::retrievability(&row.record.memory_snapshot(), now);
            SessionCard {
                retrievability: r,
                exam_priority: row.exam_name.is_some(),
                exam_name: row.exam_name,
                exam_at: row.exam_at,
                preview_intervals: Some(scheduler::preview_intervals(
                    params,
                    &row.record.memory_snapshot(),
                    now,
                )),
                card_state: row.record,
            }
        })
        .collect();

    cards.sort_by(|a, b| {
        a.retrievability
            .partial_cmp(&b.retrievability)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                a.card_state
                    .stability
                    .partial_cmp(&b.card_state.stability)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.card_state.due_at.cmp(&b.card_state.due_at))
            .then_with(|| a.card_state.id.cmp(&b.card_state.id))
    });

    if let Some(limit) = limit {
        cards.truncate(limit as usize);
    }
    Ok(cards)
}

/// Unseen cards in notebook order (content unit position, then creation).
/// Retrievability is 0 by definition: nothing has been learned yet.
pub async fn get_new_cards(
    proxy: &DatabaseProxy,
    params: &SchedulerParams,
    user_id: &str,
    now: NaiveDateTime,
    limit: Option<i64>,
) -> Result<Vec<SessionCard>, DueSetError> {
    let limit = validate_limit(limit)?;
    let rows = fetch_session_rows(proxy, user_id, SessionFilter::New, now).await?;

    let mut cards: Vec<SessionCard> = rows
        .into_iter()
        .map(|row| SessionCard {
            retrievability: 0.0,
            exam_priority: row.exam_name.is_some(),
            exam_name: row.exam_name,
            exam_at: row.exam_at,
            preview_intervals: Some(scheduler::preview_intervals(
                params,
                &row.record.memory_snapshot(),
                now,
            )),
            card_state: row.record,
        })
        .collect();

    if let Some(limit) = limit {
        cards.truncate(limit as usize);
    }
    Ok(cards)
}

/// One session fetch: ranked due cards strictly before FIFO new cards.
pub async fn get_learn_session(
    proxy: &DatabaseProxy,
    params: &SchedulerParams,
    user_id: &str,
    now: NaiveDateTime,
) -> Result<LearnSession, DueSetError> {
    let due_cards = get_due_cards(proxy, params, user_id, now, None).await?;
    let new_cards = get_new_cards(proxy, params, user_id, now, None).await?;
    Ok(LearnSession {
        due_cards,
        new_cards,
    })
}

/// Difficulty band encoded as "lo-hi" with integer endpoints, e.g. "5-6"
/// covering every difficulty whose integer part is 5 or 6, i.e. [5, 7).
/// The top band closes at the difficulty ceiling of 10.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketRange {
    pub lo: f64,
    pub hi_excl: f64,
    pub closed_top: bool,
}

pub fn parse_bucket_label(label: &str) -> Result<BucketRange, DueSetError> {
    let invalid = || DueSetError::Validation(format!("invalid bucket label: {label}"));

    let (lo_raw, hi_raw) = label.split_once('-').ok_or_else(invalid)?;
    let lo: i64 = lo_raw.trim().parse().map_err(|_| invalid())?;
    let hi: i64 = hi_raw.trim().parse().map_err(|_| invalid())?;

    if lo < 1 || hi > 10 || lo >= hi {
        return Err(invalid());
    }

    Ok(BucketRange {
        lo: lo as f64,
        hi_excl: (hi + 1) as f64,
        closed_top: hi == 10,
    })
}

/// Cards in a difficulty band, hardest-to-keep first:
/// (lapses desc, due asc, difficulty desc). `total` counts the full band
/// regardless of `limit`.
pub async fn list_cards_by_difficulty_bucket(
    proxy: &DatabaseProxy,
    user_id: &str,
    label: &str,
    limit: Option<i64>,
) -> Result<BucketResult, DueSetError> {
    let limit = validate_limit(limit)?;
    let range = parse_bucket_label(label)?;

    let mut count_qb = QueryBuilder::<Sqlite>::new(
        r#"SELECT COUNT(*) as "total" FROM "card_states" WHERE "userId" = "#,
    );
    push_bucket_filter(&mut count_qb, user_id, &range);
    let total: i64 = count_qb
        .build()
        .fetch_one(proxy.pool())
        .await?
        .try_get("total")
        .unwrap_or(0);

    let mut qb = QueryBuilder::<Sqlite>::new(
        r#"
        SELECT "id","userId","contentUnitId","direction","state","stability","difficulty",
               "due","lastReview","reps","lapses","scheduledDays","elapsedDays","suspended",
               "createdAt","updatedAt"
        FROM "card_states" WHERE "userId" = "#,
    );
    push_bucket_filter(&mut qb, user_id, &range);
    qb.push(r#" ORDER BY "lapses" DESC, "due" ASC, "difficulty" DESC, "id" ASC"#);
    if let Some(limit) = limit {
        qb.push(" LIMIT ");
        qb.push_bind(limit);
    }

    let rows = qb.build().fetch_all(proxy.pool()).await?;
    Ok(BucketResult {
        cards: rows.iter().map(card_states::map_row).collect(),
        total,
    })
}

fn push_bucket_filter(qb: &mut QueryBuilder<'_, Sqlite>, user_id: &str, range: &BucketRange) {
    qb.push_bind(user_id.to_string());
    qb.push(r#" AND "suspended" = 0 AND "difficulty" >= "#);
    qb.push_bind(range.lo);
    if range.closed_top {
        qb.push(r#" AND "difficulty" <= "#);
        qb.push_bind(10.0f64);
    } else {
        qb.push(r#" AND "difficulty" < "#);
        qb.push_bind(range.hi_excl);
    }
}

enum SessionFilter {
    Due,
    New,
}

struct SessionRow {
    record: CardStateRecord,
    exam_name: Option<String>,
    exam_at: Option<String>,
}

/// Shared query for due/new selection. Suspended cards and externally
/// disabled directions never come back; exam annotations ride along via
/// a left join.
async fn fetch_session_rows(
    proxy: &DatabaseProxy,
    user_id: &str,
    filter: SessionFilter,
    now: NaiveDateTime,
) -> Result<Vec<SessionRow>, sqlx::Error> {
    let base = r#"
        SELECT cs."id",cs."userId",cs."contentUnitId",cs."direction",cs."state",
               cs."stability",cs."difficulty",cs."due",cs."lastReview",cs."reps",
               cs."lapses",cs."scheduledDays",cs."elapsedDays",cs."suspended",
               cs."createdAt",cs."updatedAt",
               cu."disabledDirections" as "disabledDirections",
               cu."position" as "position",
               es."examName" as "examName", es."examAt" as "examAt"
        FROM "card_states" cs
        JOIN "content_units" cu ON cu."id" = cs."contentUnitId"
        LEFT JOIN "exam_signals" es ON es."contentUnitId" = cs."contentUnitId"
        WHERE cs."userId" = $1 AND cs."suspended" = 0
    "#;

    let rows = match filter {
        SessionFilter::Due => {
            let sql = format!(
                r#"{base} AND cs."state" != 'NEW' AND cs."due" <= $2 ORDER BY cs."due" ASC"#
            );
            sqlx::query(&sql)
                .bind(user_id)
                .bind(now)
                .fetch_all(proxy.pool())
                .await?
        }
        SessionFilter::New => {
            let sql = format!(
                r#"{base} AND cs."state" = 'NEW' ORDER BY cu."position" ASC, cs."createdAt" ASC, cs."id" ASC"#
            );
            sqlx::query(&sql)
                .bind(user_id)
                .fetch_all(proxy.pool())
                .await?
        }
    };

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let record = card_states::map_row(row);

        let disabled_raw: String = row.try_get("disabledDirections").unwrap_or_default();
        if direction_disabled(&disabled_raw, record.direction) {
            continue;
        }

        let exam_name: Option<String> = row.try_get("examName").ok().flatten();
        let exam_at: Option<NaiveDateTime> =
            row.try_get::<Option<NaiveDateTime>, _>("examAt").ok().flatten();

        out.push(SessionRow {
            record,
            exam_name,
            exam_at: exam_at.map(naive_to_iso),
        });
    }
    Ok(out)
}

/// `disabledDirections` is a JSON array of direction names on the content
/// unit, maintained by the editor collaborator.
fn direction_disabled(raw: &str, direction: Direction) -> bool {
    if raw.trim().is_empty() {
        return false;
    }
    let parsed: Vec<String> = serde_json::from_str(raw).unwrap_or_default();
    parsed.iter().any(|d| d == direction.as_str())
}

fn validate_limit(limit: Option<i64>) -> Result<Option<i64>, DueSetError> {
    match limit {
        Some(value) if value < 1 => Err(DueSetError::Validation(
            "limit must be a positive integer".to_string(),
        )),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_label_parses_integer_bands() {
        let range = parse_bucket_label("5-6").unwrap();
        assert_eq!(range.lo, 5.0);
        assert_eq!(range.hi_excl, 7.0);
        assert!(!range.closed_top);

        let top = parse_bucket_label("9-10").unwrap();
        assert!(top.closed_top);
    }

    #[test]
    fn bucket_label_rejects_malformed_input() {
        for label in ["", "5", "6-5", "0-3", "3-11", "a-b", "5-6-7"] {
            assert!(parse_bucket_label(label).is_err(), "accepted: {label}");
        }
    }

    #[test]
    fn bucket_membership_matches_band_semantics() {
        let range = parse_bucket_label("5-6").unwrap();
        let contains = |d: f64| d >= range.lo && d < range.hi_excl;
        assert!(contains(5.0));
        assert!(contains(6.0));
        assert!(contains(6.7));
        assert!(!contains(4.999));
        assert!(!contains(7.0));
    }

    #[test]
    fn disabled_direction_filter_reads_json_array() {
        assert!(direction_disabled(r#"["REVERSE"]"#, Direction::Reverse));
        assert!(!direction_disabled(r#"["REVERSE"]"#, Direction::Forward));
        assert!(!direction_disabled("[]", Direction::Forward));
        assert!(!direction_disabled("", Direction::Forward));
        // malformed payloads disable nothing
        assert!(!direction_disabled("not json", Direction::Forward));
    }
}
