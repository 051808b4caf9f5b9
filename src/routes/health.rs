use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
}

pub async fn health(State(state): State<AppState>) -> Response {
    let database = match state.db_proxy() {
        Some(proxy) => match sqlx::query("SELECT 1").execute(proxy.pool()).await {
            Ok(_) => "up",
            Err(_) => "down",
        },
        None => "down",
    };

    let status_code = if database == "up" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if database == "up" { "ok" } else { "degraded" },
            database,
        }),
    )
        .into_response()
}
