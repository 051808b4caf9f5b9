use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;

use crate::response::json_error;
use crate::routes::{require_auth, SuccessResponse};
use crate::services::stats as stats_service;
use crate::state::AppState;

pub async fn stats(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (proxy, user) = match require_auth(&state, &headers).await {
        Ok(value) => value,
        Err(res) => return res,
    };

    match stats_service::get_stats(proxy.as_ref(), &user.id, Utc::now().naive_utc()).await {
        Ok(stats) => Json(SuccessResponse::new(stats)).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "stats storage error");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "internal server error",
            )
            .into_response()
        }
    }
}
