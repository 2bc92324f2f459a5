//! Dealer AI Gateway Admin CLI
//!
//! Inspect and reset a running gateway's usage counters, and price
//! hypothetical requests offline.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dealer_ai_gateway::api::types::ClearUsageResponse;
use dealer_ai_gateway::PriceTable;
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::debug;

#[derive(Parser)]
#[command(name = "dealer-ai-gateway-admin")]
#[command(about = "Dealer AI Gateway Admin CLI - usage inspection and maintenance")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the running gateway
    #[arg(long, env = "GATEWAY_URL", default_value = "http://localhost:3001")]
    server: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show today's usage and alerts for one user
    Usage {
        /// User identifier
        user_id: String,
    },

    /// Drop every user's counters
    ClearUsage {
        /// Confirm the clear operation
        #[arg(long)]
        confirm: bool,
    },

    /// List the gateway's price table
    Pricing,

    /// Price a request offline with the built-in price table
    Cost {
        provider: String,
        model: String,
        input_tokens: u64,
        output_tokens: u64,
    },
}

struct AdminClient {
    client: Client,
    base: Url,
}

impl AdminClient {
    fn new(server: &str) -> Result<Self> {
        let base = Url::parse(server).with_context(|| format!("Invalid server URL: {}", server))?;
        Ok(Self {
            client: Client::new(),
            base,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Server URL cannot be a base: {}", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, method: reqwest::Method, segments: &[&str]) -> Result<reqwest::Response> {
        let url = self.url(segments)?;
        debug!("{} {}", method, url);
        let response = self
            .client
            .request(method, url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} returned {}: {}", url, status, body));
        }
        Ok(response)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    match cli.command {
        Commands::Usage { user_id } => {
            let admin = AdminClient::new(&cli.server)?;
            show_usage(&admin, &user_id).await?;
        }

        Commands::ClearUsage { confirm } => {
            if !confirm {
                println!("{}", "❌ clear-usage requires --confirm flag for safety".red());
                return Ok(());
            }
            let admin = AdminClient::new(&cli.server)?;
            let cleared: ClearUsageResponse = admin
                .send(reqwest::Method::POST, &["api", "ai", "admin", "clear-usage"])
                .await?
                .json()
                .await
                .context("Failed to parse clear-usage response")?;
            println!(
                "{}",
                format!("✅ Cleared usage for {} users", cleared.cleared_users).green()
            );
        }

        Commands::Pricing => {
            let admin = AdminClient::new(&cli.server)?;
            show_pricing(&admin).await?;
        }

        Commands::Cost {
            provider,
            model,
            input_tokens,
            output_tokens,
        } => {
            let prices = PriceTable::with_default_pricing();
            match prices.lookup(&provider, &model) {
                Some(pricing) => println!(
                    "{} {}/{}: ${:.6}",
                    "Cost".green().bold(),
                    provider,
                    model,
                    pricing.cost_for(input_tokens, output_tokens)
                ),
                None => println!(
                    "{}",
                    format!(
                        "No price for {}/{}; requests to it are not billed",
                        provider, model
                    )
                    .yellow()
                ),
            }
        }
    }

    Ok(())
}

async fn show_usage(admin: &AdminClient, user_id: &str) -> Result<()> {
    let summary: Value = admin
        .send(reqwest::Method::GET, &["api", "ai", "usage", user_id])
        .await?
        .json()
        .await
        .context("Failed to parse usage report")?;

    let daily = &summary["usage"]["daily"];
    let rate = &summary["usage"]["rate_limit"];

    println!("{}", format!("Usage for {}:", user_id).green().bold());
    println!("  Requests today: {} / {}", daily["requests"], daily["limit"]);
    println!("  Remaining free: {}", daily["remaining"]);
    println!("  Tokens today:   {}", daily["tokens"]);
    println!("  Cost today:     ${:.6}", daily["cost"].as_f64().unwrap_or_default());
    println!("  Last minute:    {} / {}", rate["requests"], rate["limit"]);

    let alerts = summary["alerts"].as_array().cloned().unwrap_or_default();
    if alerts.is_empty() {
        println!("  {}", "No alerts".green());
    }
    for alert in alerts {
        let message = alert["message"].as_str().unwrap_or_default();
        match alert["severity"].as_str() {
            Some("warning") => println!("  ⚠️  {}", message.yellow()),
            _ => println!("  ℹ️  {}", message.cyan()),
        }
    }

    Ok(())
}

async fn show_pricing(admin: &AdminClient) -> Result<()> {
    let pricing: Value = admin
        .send(reqwest::Method::GET, &["api", "ai", "pricing"])
        .await?
        .json()
        .await
        .context("Failed to parse price table")?;

    println!("{}", "Price table (USD per 1K tokens):".green().bold());
    for entry in pricing["models"].as_array().cloned().unwrap_or_default() {
        println!(
            "  {:<12} {:<24} in {:<10} out {}",
            entry["provider"].as_str().unwrap_or_default(),
            entry["model"].as_str().unwrap_or_default(),
            entry["input_price_per_1k"],
            entry["output_price_per_1k"]
        );
    }

    Ok(())
}
