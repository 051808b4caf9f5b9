use axum::http::{header, HeaderMap};
use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::Row;
use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseProxy;

const AUTH_COOKIE_NAME: &str = "auth_token";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub username: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("expired session")]
    ExpiredSession,
    #[error("database error: {0}")]
    Database(String),
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = get_cookie(headers, AUTH_COOKIE_NAME) {
        return Some(token);
    }

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())?;

    auth_header
        .strip_prefix("Bearer ")
        .map(|value| value.to_string())
}

fn get_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        let key = parts.next()?;
        if key == name {
            return parts.next().map(|value| value.to_string());
        }
    }
    None
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Resolves an opaque session token to its owner. Sessions are issued by
/// the account service; this engine only verifies them.
pub async fn verify_request_token(
    proxy: &DatabaseProxy,
    token: &str,
) -> Result<AuthUser, AuthError> {
    let token_hash = hash_token(token);

    let row = sqlx::query(
        r#"
        SELECT s."userId", s."expiresAt", u."email", u."username"
        FROM "sessions" s
        JOIN "users" u ON u."id" = s."userId"
        WHERE s."tokenHash" = $1
        LIMIT 1
        "#,
    )
    .bind(&token_hash)
    .fetch_optional(proxy.pool())
    .await
    .map_err(|e| AuthError::Database(e.to_string()))?;

    let Some(row) = row else {
        return Err(AuthError::InvalidToken);
    };

    let expires_at: NaiveDateTime = row
        .try_get("expiresAt")
        .map_err(|e| AuthError::Database(e.to_string()))?;
    if expires_at <= Utc::now().naive_utc() {
        return Err(AuthError::ExpiredSession);
    }

    Ok(AuthUser {
        id: row.try_get("userId").unwrap_or_default(),
        email: row.try_get("email").unwrap_or_default(),
        username: row.try_get("username").unwrap_or_default(),
    })
}

/// Stores a session row for `token`. Mainly for tests and local setups;
/// production sessions come from the account service writing to the same
/// table.
pub async fn issue_session(
    proxy: &DatabaseProxy,
    user_id: &str,
    token: &str,
    ttl: chrono::Duration,
) -> Result<(), AuthError> {
    sqlx::query(
        r#"INSERT INTO "sessions" ("id","userId","tokenHash","expiresAt") VALUES ($1, $2, $3, $4)"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(hash_token(token))
    .bind(Utc::now().naive_utc() + ttl)
    .execute(proxy.pool())
    .await
    .map_err(|e| AuthError::Database(e.to_string()))?;
    Ok(())
}
