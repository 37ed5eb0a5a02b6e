pub mod error;
pub mod models;
pub mod modules;
pub mod pipeline;
pub mod server;
pub mod utils;

use std::sync::Arc;

use error::{AppError, AppResult};
use pipeline::gemini::VertexClient;
use pipeline::storage::GcsClient;
use pipeline::EventHandler;
use server::{AppState, ReceiverServer};

/// 进程启动：客户端只在此创建一次，由所有调用共享
pub async fn run() -> AppResult<()> {
    modules::init_logger()?;
    let config = modules::load_app_config()?;

    let http_client =
        utils::http::create_client(config.request_timeout, Some(&config.upstream_proxy))?;
    let tokens = utils::auth::provider_from_env()?;

    let store = Arc::new(GcsClient::new(http_client.clone(), tokens.clone(), &config)?);
    let model = Arc::new(VertexClient::new(http_client, tokens, &config)?);
    tracing::info!(
        "Pipeline ready | project: {} | location: {} | model: {}",
        config.project_id,
        config.location,
        model.model()
    );

    let state = AppState {
        handler: Arc::new(EventHandler::new(store, model, config.instruction.clone())),
        redeliver_on_failure: config.redeliver_on_failure,
    };
    let (server, handle) =
        ReceiverServer::start(&config.server.host, config.server.port, state).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");
    server.stop();
    handle
        .await
        .map_err(|e| AppError::Server(format!("receiver task failed: {}", e)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
