//! LLM Request Gate
//!
//! This module holds the pieces every chat request passes through: the
//! in-memory usage store, the limit policy, the cost calculator, the provider
//! gateway with its single level of fallback, and the orchestrator tying them
//! together. Shared chat types and the provider error type live here.

pub mod cache;
pub mod cost;
pub mod gateway;
pub mod orchestrator;
pub mod policy;
pub mod providers;
pub mod sse;
pub mod telemetry;
pub mod usage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message roles accepted by the chat endpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// Chat message structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Which configured provider served (or should serve) a request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSlot {
    Primary,
    Secondary,
}

impl std::fmt::Display for ProviderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderSlot::Primary => write!(f, "primary"),
            ProviderSlot::Secondary => write!(f, "secondary"),
        }
    }
}

/// Caller's provider choice. `Auto` enables fallback to the secondary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPreference {
    Primary,
    Secondary,
    #[default]
    Auto,
}

impl std::fmt::Display for ProviderPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderPreference::Primary => write!(f, "primary"),
            ProviderPreference::Secondary => write!(f, "secondary"),
            ProviderPreference::Auto => write!(f, "auto"),
        }
    }
}

/// A complete reply from one provider call
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub text: String,
    /// Provider name as used in the price table, e.g. `openai`
    pub provider_name: String,
    pub model: String,
}

/// Error types for a single provider call
#[derive(Debug, Clone, thiserror::Error)]
pub enum LLMError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded for provider: {0}")]
    RateLimitExceeded(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Upstream returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LLMError {
    /// Map a non-success upstream status to an error
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => LLMError::AuthenticationFailed(body),
            429 => LLMError::RateLimitExceeded(body),
            400 | 413 | 422 => LLMError::InvalidRequest(body),
            _ => LLMError::Upstream {
                status,
                message: body,
            },
        }
    }

    /// True when the upstream rejected the request itself rather than failing
    pub fn is_bad_request(&self) -> bool {
        matches!(self, LLMError::InvalidRequest(_))
    }
}

/// Result type for provider calls
pub type LLMResult<T> = Result<T, LLMError>;

/// Wall-clock source for day boundaries and the rate window
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = *now + by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
