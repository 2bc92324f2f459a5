// HTTP bodies that are not domain types
// Domain results (replies, rejections, usage reports) serialize themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::cost::PriceTableEntry;
use crate::llm::orchestrator::ChatStream;
use crate::llm::ProviderSlot;

/// Error envelope for requests that never reached the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,

    #[serde(rename = "type")]
    pub error_type: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                error_type: error_type.into(),
            },
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(message, "invalid_request_error")
    }

    pub fn not_found() -> Self {
        Self::new("Not found", "not_found_error")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PricingResponse {
    pub models: Vec<PriceTableEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearUsageResponse {
    pub cleared_users: usize,
}

/// First event of a streamed reply
#[derive(Debug, Clone, Serialize)]
pub struct StreamMeta {
    pub provider_used: ProviderSlot,
    pub provider_name: String,
    pub model: String,
    pub fallback_used: bool,
    pub will_use_paid: bool,
}

impl From<&ChatStream> for StreamMeta {
    fn from(stream: &ChatStream) -> Self {
        Self {
            provider_used: stream.provider_used,
            provider_name: stream.provider_name.clone(),
            model: stream.model.clone(),
            fallback_used: stream.fallback_used,
            will_use_paid: stream.will_use_paid,
        }
    }
}
