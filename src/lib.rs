pub mod auth;
pub mod config;
pub mod db;
pub mod logging;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;

use std::sync::Arc;

use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::services::scheduler::SchedulerParams;
use crate::state::AppState;

pub async fn create_app() -> axum::Router {
    let db_proxy = match db::DatabaseProxy::from_env().await {
        Ok(proxy) => Some(proxy),
        Err(err) => {
            tracing::warn!(error = %err, "database proxy not initialized");
            None
        }
    };

    build_app(db_proxy)
}

/// Router over an existing pool. Used by tests and embedded setups.
pub async fn create_app_with_pool(pool: SqlitePool) -> Result<axum::Router, db::DbInitError> {
    let proxy = db::DatabaseProxy::from_pool(pool).await?;
    Ok(build_app(Some(Arc::new(proxy))))
}

fn build_app(db_proxy: Option<Arc<db::DatabaseProxy>>) -> axum::Router {
    let state = AppState::new(db_proxy, SchedulerParams::from_env());

    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
