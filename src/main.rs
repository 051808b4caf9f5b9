use recall_backend_rust::config::Config;
use recall_backend_rust::{db, logging};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    let _log_guard = logging::init_tracing(&config.log_level);

    let db_path = config
        .db_path
        .clone()
        .unwrap_or_else(db::database_path);
    tracing::info!(db_path = %db_path.display(), "using sqlite store");

    let app = recall_backend_rust::create_app().await;

    let addr = config.bind_addr();
    tracing::info!(%addr, "review engine listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %addr, "failed to bind");
            std::process::exit(1);
        }
    };

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %err, "server error");
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to install ctrl-c handler");
    }
}
