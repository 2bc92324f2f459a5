//! Usage log side channel
//!
//! Every billed request produces a [`UsageLogEntry`]. Writing it is best
//! effort: failures are logged at `warn` and never reach the caller, and the
//! request path spawns the write instead of awaiting it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::TelemetryConfig;
use crate::llm::ProviderSlot;

/// Table the Supabase sink writes to
pub const USAGE_LOG_TABLE: &str = "ai_usage_logs";

/// One persisted usage row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageLogEntry {
    pub id: Uuid,
    pub user_id: String,
    pub provider: ProviderSlot,
    pub provider_name: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub fallback_used: bool,
    pub will_use_paid: bool,
    pub cached: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Usage log request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Usage log rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Destination for usage log entries
#[async_trait]
pub trait UsageLogSink: Send + Sync {
    async fn write(&self, entry: &UsageLogEntry) -> Result<(), TelemetryError>;
}

/// Write an entry, logging and swallowing any failure
pub async fn record_best_effort(sink: &dyn UsageLogSink, entry: &UsageLogEntry) {
    match sink.write(entry).await {
        Ok(()) => debug!("Usage log {} written for user {}", entry.id, entry.user_id),
        Err(e) => warn!("Failed to write usage log for user {}: {}", entry.user_id, e),
    }
}

/// Fire-and-forget write on the runtime
pub fn spawn_usage_log(sink: Arc<dyn UsageLogSink>, entry: UsageLogEntry) {
    tokio::spawn(async move {
        record_best_effort(sink.as_ref(), &entry).await;
    });
}

/// Supabase PostgREST sink
pub struct SupabaseUsageLog {
    client: Client,
    endpoint: String,
    service_key: String,
}

impl SupabaseUsageLog {
    pub fn new(url: &str, service_key: &str, timeout: Duration) -> crate::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/rest/v1/{}", url.trim_end_matches('/'), USAGE_LOG_TABLE),
            service_key: service_key.to_string(),
        })
    }

    /// `None` unless both the URL and the service key are configured
    pub fn from_config(config: &TelemetryConfig, timeout: Duration) -> crate::Result<Option<Self>> {
        if !config.is_enabled() {
            return Ok(None);
        }

        match (&config.supabase_url, &config.supabase_service_key) {
            (Some(url), Some(key)) => Self::new(url, key, timeout).map(Some),
            _ => Ok(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl UsageLogSink for SupabaseUsageLog {
    async fn write(&self, entry: &UsageLogEntry) -> Result<(), TelemetryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("Prefer", "return=minimal")
            .json(entry)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TelemetryError::Rejected { status, body });
        }

        Ok(())
    }
}

/// In-memory sink for tests
#[cfg(test)]
#[derive(Default)]
pub struct MemoryUsageLog {
    pub entries: std::sync::Mutex<Vec<UsageLogEntry>>,
    pub fail: bool,
}

#[cfg(test)]
impl MemoryUsageLog {
    pub fn failing() -> Self {
        Self {
            entries: Default::default(),
            fail: true,
        }
    }

    pub fn entries(&self) -> Vec<UsageLogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl UsageLogSink for MemoryUsageLog {
    async fn write(&self, entry: &UsageLogEntry) -> Result<(), TelemetryError> {
        if self.fail {
            return Err(TelemetryError::Rejected {
                status: 500,
                body: "unavailable".to_string(),
            });
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> UsageLogEntry {
        UsageLogEntry {
            id: Uuid::new_v4(),
            user_id: "dealer-42".to_string(),
            provider: ProviderSlot::Primary,
            provider_name: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            input_tokens: 12,
            output_tokens: 30,
            cost: 0.0000198,
            fallback_used: false,
            will_use_paid: false,
            cached: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let sink = MemoryUsageLog::failing();
        record_best_effort(&sink, &entry()).await;
        assert!(sink.entries().is_empty());
    }

    #[tokio::test]
    async fn test_successful_write() {
        let sink = MemoryUsageLog::default();
        let entry = entry();
        record_best_effort(&sink, &entry).await;
        assert_eq!(sink.entries(), vec![entry]);
    }

    #[test]
    fn test_supabase_disabled_without_config() {
        let sink =
            SupabaseUsageLog::from_config(&TelemetryConfig::default(), Duration::from_secs(5))
                .unwrap();
        assert!(sink.is_none());
    }

    #[test]
    fn test_supabase_endpoint() {
        let config = TelemetryConfig {
            supabase_url: Some("https://project.supabase.co/".to_string()),
            supabase_service_key: Some("service-key".to_string()),
        };
        let sink = SupabaseUsageLog::from_config(&config, Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert_eq!(sink.endpoint(), "https://project.supabase.co/rest/v1/ai_usage_logs");
    }

    #[test]
    fn test_entry_serializes_slot_name() {
        let json = serde_json::to_value(entry()).unwrap();
        assert_eq!(json["provider"], "primary");
        assert_eq!(json["provider_name"], "openai");
    }
}
