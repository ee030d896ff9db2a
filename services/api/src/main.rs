mod config;
mod gemini_adapter;
mod prompt_loader;
mod ws;

use crate::config::Config;
use crate::gemini_adapter::GeminiConnector;
use crate::ws::AppState;
use anyhow::{Context, Result};
use axum::http::HeaderValue;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;
use voice_relay_core::SessionDefaults;

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    info!("Configuration loaded successfully. Starting voice relay...");

    // --- 3. Load Prompts ---
    let prompts = prompt_loader::load_language_prompts(&config.prompts_dir)
        .context("Failed to load system prompts")?;
    info!("Loaded {} language prompts.", prompts.len());

    let defaults = SessionDefaults {
        prompts,
        ..SessionDefaults::default()
    };

    // --- 4. Build the application ---
    let cors = match &config.cors_origin {
        Some(origin) => {
            let origin = HeaderValue::from_str(origin)
                .with_context(|| format!("Invalid CORS_ORIGIN: {}", origin))?;
            CorsLayer::new().allow_origin(AllowOrigin::exact(origin))
        }
        None => CorsLayer::new().allow_origin(Any),
    }
    .allow_methods(Any)
    .allow_headers(Any);

    let state = AppState {
        connector: Arc::new(GeminiConnector::new(config.gemini)),
        defaults: Arc::new(defaults),
    };
    let app = ws::router(state).layer(cors);

    // --- 5. Serve ---
    info!("Starting WebSocket server, listening on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
