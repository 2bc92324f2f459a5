// Dealer AI Gateway - HTTP server
// Run with: cargo run --bin server

//! # Gateway Server Binary
//!
//! Starts the chat gate behind the dealership assistant.
//!
//! ```text
//! main()
//!   ↓ reads
//! Settings (CLI flags + env + .env)
//!   ↓ wires
//! RequestOrchestrator (usage store, providers, price table, usage log)
//!   ↓ served by
//! GatewayServer (Axum)
//! ```
//!
//! Usage counters live in process memory: restarting the server resets every
//! user's daily quota and rate window.

use anyhow::Result;
use clap::Parser;
use dealer_ai_gateway::{GatewayServerBuilder, RequestOrchestrator, Settings};
use dotenv::dotenv;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real deployments set the environment directly
    let dotenv_result = dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = dotenv_result {
        warn!("Could not load .env file: {}", e);
    }

    let settings = Settings::parse();

    info!("🚀 Starting Dealer AI Gateway...");
    info!("=====================================");
    info!("Primary provider: openai ({})", settings.providers.openai.model);
    info!("Secondary provider: huggingface ({})", settings.providers.huggingface.model);
    if settings.providers.openai.api_key.is_some() {
        info!("✅ OpenAI API key configured");
    }
    if settings.providers.huggingface.api_key.is_some() {
        info!("✅ Hugging Face API key configured");
    }
    if !settings.telemetry.is_enabled() {
        info!("Usage logging disabled (SUPABASE_URL / SUPABASE_SERVICE_KEY not set)");
    }

    let orchestrator = RequestOrchestrator::from_settings(&settings)?;

    let sweep_interval = Duration::from_secs(settings.maintenance.usage_sweep_interval_secs);
    if orchestrator.spawn_maintenance(sweep_interval).is_some() {
        info!("Usage sweep every {}s", sweep_interval.as_secs());
    }

    GatewayServerBuilder::new()
        .with_config(settings.server.clone())
        .with_orchestrator(orchestrator)
        .build()?
        .run()
        .await?;

    Ok(())
}
