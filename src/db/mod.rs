pub mod schema;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::db::schema::{split_sql_statements, SCHEMA_SQL};

const SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid database config: {0}")]
    Config(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Shared handle to the engine's SQLite store.
#[derive(Clone)]
pub struct DatabaseProxy {
    pool: SqlitePool,
}

impl DatabaseProxy {
    pub async fn from_env() -> Result<Arc<Self>, DbInitError> {
        let db_path = database_path();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DbInitError::Io(e.to_string()))?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(|e| DbInitError::Config(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;

        Ok(Arc::new(Self { pool }))
    }

    /// Wraps an already-connected pool, applying migrations if needed.
    /// Used by tests and embedded setups.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, DbInitError> {
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub fn database_path() -> PathBuf {
    if let Ok(path) = std::env::var("RECALL_DB_PATH") {
        return PathBuf::from(path);
    }

    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("com.recall.app")
        .join("data.db")
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbInitError> {
    let version: Option<String> =
        sqlx::query_scalar(r#"SELECT "value" FROM "_db_metadata" WHERE "key" = 'schema_version'"#)
            .fetch_optional(pool)
            .await
            .unwrap_or(None);

    if version.is_some() {
        return Ok(());
    }

    let statements = split_sql_statements(SCHEMA_SQL);
    for stmt in statements {
        let sql: String = stmt
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            continue;
        }
        sqlx::query(trimmed).execute(pool).await?;
    }

    sqlx::query(r#"INSERT OR REPLACE INTO "_db_metadata" ("key", "value") VALUES ('schema_version', $1)"#)
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}
