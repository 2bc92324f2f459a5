// Dealer AI Gateway
// Usage-limited, provider-fallback chat gateway for the dealership assistant

//! # Dealer AI Gateway
//!
//! This is the library root for the chat gateway that sits behind the
//! dealership site's AI assistant. Every chat request passes through a small
//! pipeline:
//!
//! ```text
//! RequestOrchestrator
//!   ↓ admits via
//! UsageStore + Limit Policy   (per-minute window, daily quota, paid overflow)
//!   ↓ dispatches to
//! ProviderGateway             (primary, then secondary on failure in auto mode)
//!   ↓ bills with
//! PriceTable                  (unknown models are free)
//!   ↓ records to
//! UsageStore + UsageLogSink   (in-memory counters, best-effort log)
//! ```
//!
//! ## Modules
//!
//! - [`config`]: process settings read once at start (env + CLI)
//! - [`llm`]: the request gate itself
//! - [`api`]: axum HTTP surface for the chat endpoint and admin routes

pub mod config;

pub mod llm;

pub mod api;

pub use config::{
    LimitsConfig, MaintenanceConfig, ProvidersConfig, ServerConfig, Settings, TelemetryConfig,
};

pub use llm::{
    cost::{ModelPricing, PriceTable},
    gateway::{GatewayError, GatewayReply, ProviderGateway},
    orchestrator::{ChatOutcome, ChatReply, ChatRequest, RequestOrchestrator},
    policy::{Alert, AlertSeverity, RejectionReason, RequestDecision, UsageReport},
    usage::{RateWindow, UsageRecord, UsageSnapshot, UsageStore},
    ChatMessage, Clock, LLMError, LLMResult, MessageRole, ProviderPreference, ProviderSlot,
    SystemClock,
};

pub use api::{GatewayServer, GatewayServerBuilder};

use thiserror::Error;

/// Crate-level errors for start-up and wiring.
///
/// Per-request outcomes never surface here: policy rejections and upstream
/// failures are reported through [`ChatOutcome`].
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// An HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Socket or filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP server failed to bind or stopped with an error
    #[error("Server error: {0}")]
    Server(String),
}

/// Result alias used by the wiring and server code
pub type Result<T> = std::result::Result<T, AppError>;
