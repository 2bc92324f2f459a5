//! Process configuration
//!
//! All settings are read once at start-up from command-line flags with
//! environment fallbacks (a `.env` file is loaded by the binaries first) and
//! treated as constants for the lifetime of the process.

use clap::{ArgAction, Args, Parser};

/// Top-level settings for the gateway server
#[derive(Debug, Clone, Parser, Default)]
#[command(name = "dealer-ai-gateway")]
#[command(about = "Usage-limited AI chat gateway for the dealership assistant")]
pub struct Settings {
    #[command(flatten)]
    pub limits: LimitsConfig,

    #[command(flatten)]
    pub providers: ProvidersConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,

    #[command(flatten)]
    pub maintenance: MaintenanceConfig,

    #[command(flatten)]
    pub server: ServerConfig,
}

/// Free quota and rate limiting
#[derive(Debug, Clone, Args)]
pub struct LimitsConfig {
    /// Free requests per user per calendar day
    #[arg(long, env = "FREE_DAILY_REQUEST_LIMIT", default_value_t = 100)]
    pub free_daily_request_limit: u64,

    /// Requests per user in any trailing 60 second window
    #[arg(long, env = "RATE_LIMIT_PER_MINUTE", default_value_t = 20)]
    pub rate_limit_per_minute: u32,

    /// Keep serving past the free daily quota (billed as paid usage)
    #[arg(long, env = "ALLOW_PAID_OVERFLOW", default_value_t = false, action = ArgAction::Set)]
    pub allow_paid_overflow: bool,

    /// Daily cost above which an informational alert is attached
    #[arg(long, env = "DAILY_COST_ALERT_THRESHOLD", default_value_t = 1.0)]
    pub daily_cost_alert_threshold: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            free_daily_request_limit: 100,
            rate_limit_per_minute: 20,
            allow_paid_overflow: false,
            daily_cost_alert_threshold: 1.0,
        }
    }
}

/// Upstream provider settings
#[derive(Debug, Clone, Args)]
pub struct ProvidersConfig {
    #[command(flatten)]
    pub openai: OpenAIConfig,

    #[command(flatten)]
    pub huggingface: HuggingFaceConfig,

    /// Per-call timeout applied by the provider HTTP clients
    #[arg(long, env = "PROVIDER_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: OpenAIConfig::default(),
            huggingface: HuggingFaceConfig::default(),
            timeout_secs: 30,
        }
    }
}

/// Primary provider (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Args)]
pub struct OpenAIConfig {
    #[arg(
        id = "openai_api_key",
        long = "openai-api-key",
        env = "OPENAI_API_KEY",
        hide_env_values = true
    )]
    pub api_key: Option<String>,

    #[arg(
        id = "openai_base_url",
        long = "openai-base-url",
        env = "OPENAI_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    pub base_url: String,

    #[arg(
        id = "openai_model",
        long = "openai-model",
        env = "OPENAI_MODEL",
        default_value = "gpt-4o-mini"
    )]
    pub model: String,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Secondary provider (Hugging Face inference API)
#[derive(Debug, Clone, Args)]
pub struct HuggingFaceConfig {
    #[arg(
        id = "huggingface_api_key",
        long = "huggingface-api-key",
        env = "HUGGINGFACE_API_KEY",
        hide_env_values = true
    )]
    pub api_key: Option<String>,

    #[arg(
        id = "huggingface_base_url",
        long = "huggingface-base-url",
        env = "HUGGINGFACE_BASE_URL",
        default_value = "https://api-inference.huggingface.co/models"
    )]
    pub base_url: String,

    #[arg(
        id = "huggingface_model",
        long = "huggingface-model",
        env = "HUGGINGFACE_MODEL",
        default_value = "mistralai/Mistral-7B-Instruct-v0.2"
    )]
    pub model: String,
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api-inference.huggingface.co/models".to_string(),
            model: "mistralai/Mistral-7B-Instruct-v0.2".to_string(),
        }
    }
}

/// Usage log persistence. Enabled only when both values are present.
#[derive(Debug, Clone, Args, Default)]
pub struct TelemetryConfig {
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    #[arg(long, env = "SUPABASE_SERVICE_KEY", hide_env_values = true)]
    pub supabase_service_key: Option<String>,
}

impl TelemetryConfig {
    pub fn is_enabled(&self) -> bool {
        matches!(
            (&self.supabase_url, &self.supabase_service_key),
            (Some(url), Some(key)) if !url.is_empty() && !key.is_empty()
        )
    }
}

/// Background maintenance and the optional response cache
#[derive(Debug, Clone, Args)]
pub struct MaintenanceConfig {
    /// Interval of the stale-usage sweep; 0 disables it
    #[arg(long, env = "USAGE_SWEEP_INTERVAL_SECS", default_value_t = 3600)]
    pub usage_sweep_interval_secs: u64,

    /// Lifetime of cached replies; 0 disables the cache
    #[arg(long, env = "RESPONSE_CACHE_TTL_SECS", default_value_t = 0)]
    pub response_cache_ttl_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            usage_sweep_interval_secs: 3600,
            response_cache_ttl_secs: 0,
        }
    }
}

/// HTTP listener
#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 3001)]
    pub port: u16,

    #[arg(long, env = "CORS_ENABLED", default_value_t = true, action = ArgAction::Set)]
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            cors_enabled: true,
        }
    }
}
