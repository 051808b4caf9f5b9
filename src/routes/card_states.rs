use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::response::json_error;
use crate::routes::{require_auth, SuccessResponse};
use crate::services::card_states::{self, CardStateError, Direction};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureRequest {
    content_unit_id: String,
    directions: Vec<Direction>,
}

pub async fn ensure(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<EnsureRequest>,
) -> Response {
    let (proxy, user) = match require_auth(&state, &headers).await {
        Ok(value) => value,
        Err(res) => return res,
    };

    if payload.content_unit_id.trim().is_empty() {
        return json_error(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "contentUnitId must be a non-empty string",
        )
        .into_response();
    }

    match card_states::ensure_card_states(
        proxy.as_ref(),
        &user.id,
        &payload.content_unit_id,
        &payload.directions,
        Utc::now().naive_utc(),
    )
    .await
    {
        Ok(records) => Json(SuccessResponse::new(records)).into_response(),
        Err(err) => handle_service_error(err),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteResponse {
    deleted: u64,
}

pub async fn delete_for_unit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(content_unit_id): Path<String>,
) -> Response {
    let (proxy, user) = match require_auth(&state, &headers).await {
        Ok(value) => value,
        Err(res) => return res,
    };

    match card_states::delete_for_content_unit(proxy.as_ref(), &user.id, &content_unit_id).await
    {
        Ok(deleted) => Json(SuccessResponse::new(DeleteResponse { deleted })).into_response(),
        Err(err) => handle_service_error(err),
    }
}

pub(crate) fn handle_service_error(err: CardStateError) -> Response {
    match err {
        CardStateError::Validation(message) => {
            json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message).into_response()
        }
        CardStateError::Unauthorized(message) => {
            json_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message).into_response()
        }
        CardStateError::NotFound(message) => {
            json_error(StatusCode::NOT_FOUND, "NOT_FOUND", message).into_response()
        }
        CardStateError::Sql(err) => {
            tracing::error!(error = %err, "card state storage error");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "internal server error",
            )
            .into_response()
        }
    }
}
