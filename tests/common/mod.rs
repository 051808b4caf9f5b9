#![allow(dead_code)]

use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use std::path::PathBuf;
use tempfile::TempDir;
use uuid::Uuid;

use recall_backend_rust::db::DatabaseProxy;

pub struct TestDb {
    pub proxy: DatabaseProxy,
    _temp_dir: TempDir,
}

pub async fn setup() -> TestDb {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let pool = create_test_sqlite_pool(db_path)
        .await
        .expect("failed to create sqlite pool");
    let proxy = DatabaseProxy::from_pool(pool)
        .await
        .expect("failed to run migrations");
    TestDb {
        proxy,
        _temp_dir: temp_dir,
    }
}

pub async fn create_test_sqlite_pool(db_path: PathBuf) -> Result<SqlitePool, sqlx::Error> {
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).expect("failed to create parent dir");
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(30));

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// Fixed clock for deterministic scheduling math: 2025-06-15 12:00:00 UTC.
pub fn fixed_now() -> NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(2025, 6, 15)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

pub fn days(n: i64) -> chrono::Duration {
    chrono::Duration::days(n)
}

pub fn seconds(n: i64) -> chrono::Duration {
    chrono::Duration::seconds(n)
}

pub async fn seed_user(proxy: &DatabaseProxy, user_id: &str) {
    sqlx::query(r#"INSERT INTO "users" ("id","email","username") VALUES ($1, $2, $3)"#)
        .bind(user_id)
        .bind(format!("{user_id}@example.com"))
        .bind(user_id)
        .execute(proxy.pool())
        .await
        .expect("failed to seed user");
}

pub async fn seed_content_unit(
    proxy: &DatabaseProxy,
    user_id: &str,
    unit_id: &str,
    position: i64,
    disabled_directions: &[&str],
) {
    let disabled = serde_json::to_string(disabled_directions).unwrap();
    sqlx::query(
        r#"
        INSERT INTO "content_units"
          ("id","userId","frontText","backText","disabledDirections","position")
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(unit_id)
    .bind(user_id)
    .bind(format!("front of {unit_id}"))
    .bind(format!("back of {unit_id}"))
    .bind(disabled)
    .bind(position)
    .execute(proxy.pool())
    .await
    .expect("failed to seed content unit");
}

pub async fn seed_exam_signal(proxy: &DatabaseProxy, user_id: &str, unit_id: &str, name: &str) {
    sqlx::query(
        r#"INSERT INTO "exam_signals" ("contentUnitId","userId","examName","examAt") VALUES ($1, $2, $3, $4)"#,
    )
    .bind(unit_id)
    .bind(user_id)
    .bind(name)
    .bind(fixed_now() + days(7))
    .execute(proxy.pool())
    .await
    .expect("failed to seed exam signal");
}

/// Direct card-state row fixture, for tests that need precise scheduling
/// fields without replaying reviews.
pub struct CardFixture {
    pub id: String,
    pub user_id: String,
    pub content_unit_id: String,
    pub direction: &'static str,
    pub state: &'static str,
    pub stability: f64,
    pub difficulty: f64,
    pub due: NaiveDateTime,
    pub last_review: Option<NaiveDateTime>,
    pub reps: i64,
    pub lapses: i64,
    pub suspended: bool,
}

impl CardFixture {
    pub fn new(user_id: &str, content_unit_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            content_unit_id: content_unit_id.to_string(),
            direction: "FORWARD",
            state: "NEW",
            stability: 0.0,
            difficulty: 0.0,
            due: fixed_now() - seconds(60),
            last_review: None,
            reps: 0,
            lapses: 0,
            suspended: false,
        }
    }
}

pub async fn insert_card(proxy: &DatabaseProxy, fixture: &CardFixture) -> String {
    sqlx::query(
        r#"
        INSERT INTO "card_states"
          ("id","userId","contentUnitId","direction","state","stability","difficulty",
           "due","lastReview","reps","lapses","suspended","createdAt","updatedAt")
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
        "#,
    )
    .bind(&fixture.id)
    .bind(&fixture.user_id)
    .bind(&fixture.content_unit_id)
    .bind(fixture.direction)
    .bind(fixture.state)
    .bind(fixture.stability)
    .bind(fixture.difficulty)
    .bind(fixture.due)
    .bind(fixture.last_review)
    .bind(fixture.reps)
    .bind(fixture.lapses)
    .bind(if fixture.suspended { 1i64 } else { 0i64 })
    .bind(fixed_now() - days(30))
    .execute(proxy.pool())
    .await
    .expect("failed to insert card fixture");
    fixture.id.clone()
}

pub async fn insert_log(
    proxy: &DatabaseProxy,
    card_state_id: &str,
    user_id: &str,
    rating: i64,
    reviewed_at: NaiveDateTime,
) -> String {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO "review_logs"
          ("id","cardStateId","userId","rating","state","scheduledDays",
           "elapsedDays","stability","difficulty","reviewedAt","createdAt")
        VALUES ($1, $2, $3, $4, 'REVIEW', 1.0, 1.0, 1.0, 5.0, $5, $5)
        "#,
    )
    .bind(&id)
    .bind(card_state_id)
    .bind(user_id)
    .bind(rating)
    .bind(reviewed_at)
    .execute(proxy.pool())
    .await
    .expect("failed to insert review log");
    id
}
