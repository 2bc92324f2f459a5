// HTTP API module
// Exposes the chat gate, usage reports and admin routes over axum

pub mod handlers;
pub mod types;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::{ServerConfig, Settings};
use crate::llm::orchestrator::RequestOrchestrator;
use crate::AppError;
use handlers::{chat, clear_usage, get_pricing, get_usage, health_check, not_found, GatewayApiState};

/// HTTP server for the chat gate
pub struct GatewayServer {
    config: ServerConfig,
    state: GatewayApiState,
}

impl GatewayServer {
    pub fn new(config: ServerConfig, orchestrator: RequestOrchestrator) -> Self {
        Self {
            config,
            state: GatewayApiState::new(orchestrator),
        }
    }

    pub fn orchestrator(&self) -> &RequestOrchestrator {
        &self.state.orchestrator
    }

    /// Create the Axum router with all routes
    pub fn create_router(&self) -> Router {
        let api_router = Router::new()
            .route("/api/ai/chat", post(chat))
            .route("/api/ai/usage/:user_id", get(get_usage))
            .route("/api/ai/pricing", get(get_pricing))
            .route("/api/ai/admin/clear-usage", post(clear_usage))
            .route("/health", get(health_check))
            .fallback(not_found)
            .with_state(self.state.clone());

        if self.config.cors_enabled {
            api_router.layer(CorsLayer::permissive())
        } else {
            api_router
        }
    }

    /// Run the server until it fails
    pub async fn run(self) -> crate::Result<()> {
        let app = self.create_router();
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid listen address: {}", e)))?;

        info!("🚗 Dealer AI gateway starting");
        info!("📡 Server address: http://{}", addr);
        info!("🔗 API endpoints:");
        info!("   POST http://{}/api/ai/chat", addr);
        info!("   GET  http://{}/api/ai/usage/:user_id", addr);
        info!("   GET  http://{}/api/ai/pricing", addr);
        info!("   POST http://{}/api/ai/admin/clear-usage", addr);
        info!("   GET  http://{}/health", addr);
        info!("📋 Limits:");
        let limits = self.state.orchestrator.limits();
        info!("   Free requests per day: {}", limits.free_daily_request_limit);
        info!("   Requests per minute: {}", limits.rate_limit_per_minute);
        info!("   Paid overflow: {}", limits.allow_paid_overflow);
        info!("   CORS enabled: {}", self.config.cors_enabled);

        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .await
            .map_err(|e| AppError::Server(e.to_string()))
    }
}

/// Builder pattern for the gateway server
pub struct GatewayServerBuilder {
    config: ServerConfig,
    orchestrator: Option<RequestOrchestrator>,
}

impl GatewayServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            orchestrator: None,
        }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn with_host(mut self, host: String) -> Self {
        self.config.host = host;
        self
    }

    pub fn with_cors(mut self, enabled: bool) -> Self {
        self.config.cors_enabled = enabled;
        self
    }

    pub fn with_orchestrator(mut self, orchestrator: RequestOrchestrator) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Without an explicit orchestrator, one is wired from default settings
    pub fn build(self) -> crate::Result<GatewayServer> {
        let orchestrator = match self.orchestrator {
            Some(orchestrator) => orchestrator,
            None => RequestOrchestrator::from_settings(&Settings::default())?,
        };
        Ok(GatewayServer::new(self.config, orchestrator))
    }
}

impl Default for GatewayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
