mod card_states;
mod health;
mod leeches;
mod reviews;
mod sessions;
mod stats;

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde::Serialize;

use crate::auth::{self, AuthError, AuthUser};
use crate::db::DatabaseProxy;
use crate::response::json_error;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/v1/card-states/ensure", post(card_states::ensure))
        .route(
            "/api/v1/card-states/content-unit/:id",
            delete(card_states::delete_for_unit),
        )
        .route("/api/v1/reviews", post(reviews::submit))
        .route("/api/v1/reviews/undo", post(reviews::undo))
        .route("/api/v1/session", get(sessions::learn_session))
        .route("/api/v1/session/due", get(sessions::due_cards))
        .route("/api/v1/session/new", get(sessions::new_cards))
        .route("/api/v1/cards/bucket/:label", get(sessions::bucket))
        .route("/api/v1/leeches", get(leeches::list))
        .route("/api/v1/leeches/stats", get(leeches::stats))
        .route("/api/v1/leeches/suspend", post(leeches::suspend))
        .route("/api/v1/stats", get(stats::stats))
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler() -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "route not found").into_response()
}

#[derive(Serialize)]
pub(crate) struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Token extraction + session verification, shared by every handler.
pub(crate) async fn require_auth(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(Arc<DatabaseProxy>, AuthUser), Response> {
    let Some(proxy) = state.db_proxy() else {
        return Err(json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "database unavailable",
        )
        .into_response());
    };

    let Some(token) = auth::extract_token(headers) else {
        return Err(json_error(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing authentication token",
        )
        .into_response());
    };

    match auth::verify_request_token(proxy.as_ref(), &token).await {
        Ok(user) => Ok((proxy, user)),
        Err(AuthError::Database(err)) => {
            tracing::error!(error = %err, "session lookup failed");
            Err(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "internal server error",
            )
            .into_response())
        }
        Err(_) => Err(json_error(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "authentication failed",
        )
        .into_response()),
    }
}
