use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::response::json_error;
use crate::routes::{require_auth, SuccessResponse};
use crate::services::leech::{self, LeechError};
use crate::state::AppState;

pub async fn list(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (proxy, user) = match require_auth(&state, &headers).await {
        Ok(value) => value,
        Err(res) => return res,
    };

    match leech::list_leech_cards(proxy.as_ref(), &user.id).await {
        Ok(cards) => Json(SuccessResponse::new(cards)).into_response(),
        Err(err) => handle_service_error(err),
    }
}

pub async fn stats(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (proxy, user) = match require_auth(&state, &headers).await {
        Ok(value) => value,
        Err(res) => return res,
    };

    match leech::get_leech_stats(proxy.as_ref(), &user.id).await {
        Ok(stats) => Json(SuccessResponse::new(stats)).into_response(),
        Err(err) => handle_service_error(err),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspendRequest {
    card_state_ids: Vec<String>,
    suspend: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SuspendResponse {
    suspended: bool,
    succeeded: usize,
    skipped: usize,
}

pub async fn suspend(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SuspendRequest>,
) -> Response {
    let (proxy, user) = match require_auth(&state, &headers).await {
        Ok(value) => value,
        Err(res) => return res,
    };

    match leech::bulk_suspend_cards(
        proxy.as_ref(),
        &user.id,
        &payload.card_state_ids,
        payload.suspend,
    )
    .await
    {
        Ok(result) => Json(SuccessResponse::new(SuspendResponse {
            suspended: payload.suspend,
            succeeded: result.succeeded.len(),
            skipped: result.skipped.len(),
        }))
        .into_response(),
        Err(err) => handle_service_error(err),
    }
}

fn handle_service_error(err: LeechError) -> Response {
    match err {
        LeechError::Validation(message) => {
            json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message).into_response()
        }
        LeechError::Sql(err) => {
            tracing::error!(error = %err, "leech storage error");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "internal server error",
            )
            .into_response()
        }
    }
}
