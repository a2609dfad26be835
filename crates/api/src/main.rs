use std::net::SocketAddr;

use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use valuo_api::config::ServerConfig;
use valuo_api::router::build_app_router;
use valuo_api::state::AppState;
use valuo_events::RunNotice;
use valuo_pipeline::PipelineRunner;
use valuo_storage::RunStore;
use valuo_worker::Orchestrator;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "valuo_api=debug,valuo_worker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        artifacts_root = %config.artifacts_root.display(),
        auth = config.api_key.is_some(),
        "Loaded server configuration",
    );

    // --- Run store ---
    tokio::fs::create_dir_all(&config.artifacts_root)
        .await
        .expect("Failed to create ARTIFACTS_ROOT");
    let store = RunStore::new(config.artifacts_root.clone());

    // --- Orchestrator ---
    let runner = PipelineRunner::new().with_code_sha(config.code_sha.clone());
    let orchestrator = Orchestrator::start(config.orchestrator_config(), runner, store);

    // Lifecycle notices go to the log.
    let notice_handle = tokio::spawn(log_run_notices(orchestrator.subscribe()));

    // --- App state + router ---
    let state = AppState::new(config.clone(), orchestrator.clone());
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    orchestrator.shutdown().await;
    notice_handle.abort();

    tracing::info!("Graceful shutdown complete");
}

async fn log_run_notices(mut rx: broadcast::Receiver<RunNotice>) {
    loop {
        match rx.recv().await {
            Ok(notice) => tracing::info!(
                run_id = %notice.run_id,
                status = %notice.status,
                attempt = notice.attempts,
                error = notice.error.as_deref().unwrap_or(""),
                "Run status changed",
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Run notice logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
