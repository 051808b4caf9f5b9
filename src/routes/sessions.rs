use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::response::json_error;
use crate::routes::{require_auth, SuccessResponse};
use crate::services::due_set::{self, DueSetError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    limit: Option<i64>,
}

pub async fn due_cards(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LimitQuery>,
) -> Response {
    let (proxy, user) = match require_auth(&state, &headers).await {
        Ok(value) => value,
        Err(res) => return res,
    };

    match due_set::get_due_cards(
        proxy.as_ref(),
        state.scheduler_params(),
        &user.id,
        Utc::now().naive_utc(),
        query.limit,
    )
    .await
    {
        Ok(cards) => Json(SuccessResponse::new(cards)).into_response(),
        Err(err) => handle_service_error(err),
    }
}

pub async fn new_cards(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LimitQuery>,
) -> Response {
    let (proxy, user) = match require_auth(&state, &headers).await {
        Ok(value) => value,
        Err(res) => return res,
    };

    match due_set::get_new_cards(
        proxy.as_ref(),
        state.scheduler_params(),
        &user.id,
        Utc::now().naive_utc(),
        query.limit,
    )
    .await
    {
        Ok(cards) => Json(SuccessResponse::new(cards)).into_response(),
        Err(err) => handle_service_error(err),
    }
}

pub async fn learn_session(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (proxy, user) = match require_auth(&state, &headers).await {
        Ok(value) => value,
        Err(res) => return res,
    };

    match due_set::get_learn_session(
        proxy.as_ref(),
        state.scheduler_params(),
        &user.id,
        Utc::now().naive_utc(),
    )
    .await
    {
        Ok(session) => Json(SuccessResponse::new(session)).into_response(),
        Err(err) => handle_service_error(err),
    }
}

pub async fn bucket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(label): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Response {
    let (proxy, user) = match require_auth(&state, &headers).await {
        Ok(value) => value,
        Err(res) => return res,
    };

    match due_set::list_cards_by_difficulty_bucket(proxy.as_ref(), &user.id, &label, query.limit)
        .await
    {
        Ok(result) => Json(SuccessResponse::new(result)).into_response(),
        Err(err) => handle_service_error(err),
    }
}

fn handle_service_error(err: DueSetError) -> Response {
    match err {
        DueSetError::Validation(message) => {
            json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message).into_response()
        }
        DueSetError::Sql(err) => {
            tracing::error!(error = %err, "due-set storage error");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "internal server error",
            )
            .into_response()
        }
    }
}
