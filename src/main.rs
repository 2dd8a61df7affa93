use crate::config::load_config;
use crate::gemini::GeminiApiClient;
use crate::ledger::{check_rpc, ContractLedger};
use crate::responder::MentionResponder;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod gemini;
mod ledger;
mod log_dedup;
mod mention;
mod mention_cache;
mod models;
mod prompt;
mod responder;

#[cfg(test)]
mod tests;

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up a local .env the same way the gateway does
    dotenvy::dotenv().ok();

    let app_settings = load_config().with_context(|| "Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(app_settings.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Configuration loaded. Using log level: {}", app_settings.log_level);

    let ledger = ContractLedger::new(&app_settings)
        .with_context(|| "Failed to create contract client")?;
    match check_rpc(&app_settings).await {
        Ok(chain_id) if chain_id != app_settings.chain_id => warn!(
            "RPC reports chain id {} but CHAIN_ID is {}; transactions may be rejected",
            chain_id, app_settings.chain_id
        ),
        Ok(chain_id) => info!("Connected to chain {}", chain_id),
        Err(e) => warn!("RPC endpoint not reachable yet: {}", e),
    }
    info!("PolyX contract client initialized for {:?}", ledger.address());

    let gemini_client = GeminiApiClient::new(&app_settings)
        .with_context(|| "Failed to create Gemini client")?;
    if app_settings.gemini_api_key.is_none() {
        warn!("GEMINI_API_KEY not set. Chatbot replies will fail until it is configured.");
    } else {
        info!("Chatbot initialized with model {}", gemini_client.model());
    }

    let bot_identity = app_settings.bot_identity()?;
    let responder = MentionResponder::new(Arc::new(ledger), Arc::new(gemini_client), bot_identity);
    responder.start_polling(app_settings.poll_interval()).await;

    let listener = tokio::net::TcpListener::bind(&app_settings.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", app_settings.bind_address))?;
    info!("PolyX responder listening on http://{}", app_settings.bind_address);

    axum::serve(listener, api::router(responder.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .with_context(|| "HTTP server error")?;

    responder.shutdown().await;
    info!("Shut down cleanly");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm => {}
    }
    info!("Shutdown signal received");
}
