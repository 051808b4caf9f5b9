use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::response::json_error;
use crate::routes::{require_auth, SuccessResponse};
use crate::services::card_states::CardStateSnapshot;
use crate::services::reviews::{self, ReviewError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    card_state_id: String,
    rating: i64,
}

pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SubmitRequest>,
) -> Response {
    let (proxy, user) = match require_auth(&state, &headers).await {
        Ok(value) => value,
        Err(res) => return res,
    };

    match reviews::submit_review(
        proxy.as_ref(),
        state.scheduler_params(),
        &user.id,
        &payload.card_state_id,
        payload.rating,
        Utc::now().naive_utc(),
    )
    .await
    {
        Ok(outcome) => Json(SuccessResponse::new(outcome)).into_response(),
        Err(err) => handle_service_error(err),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoRequest {
    card_state_id: String,
    previous_state: CardStateSnapshot,
    #[serde(default)]
    review_log_id: Option<String>,
}

pub async fn undo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UndoRequest>,
) -> Response {
    let (proxy, user) = match require_auth(&state, &headers).await {
        Ok(value) => value,
        Err(res) => return res,
    };

    match reviews::undo_review(
        proxy.as_ref(),
        &user.id,
        &payload.card_state_id,
        &payload.previous_state,
        payload.review_log_id.as_deref(),
    )
    .await
    {
        Ok(()) => Json(SuccessResponse::new(serde_json::json!({ "undone": true })))
            .into_response(),
        Err(err) => handle_service_error(err),
    }
}

fn handle_service_error(err: ReviewError) -> Response {
    match err {
        ReviewError::InvalidRating(_) => {
            json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string())
                .into_response()
        }
        ReviewError::Unauthorized(message) => {
            json_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message).into_response()
        }
        ReviewError::NotFound(message) => {
            json_error(StatusCode::NOT_FOUND, "NOT_FOUND", message).into_response()
        }
        ReviewError::Mismatch | ReviewError::StaleLog => {
            json_error(StatusCode::CONFLICT, "CONFLICT", err.to_string()).into_response()
        }
        ReviewError::Sql(err) => {
            tracing::error!(error = %err, "review storage error");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "internal server error",
            )
            .into_response()
        }
    }
}
