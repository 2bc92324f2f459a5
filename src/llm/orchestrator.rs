//! Request orchestrator
//!
//! Entry point for one chat request:
//!
//! 1. admit against the limit policy (and record the window timestamp)
//! 2. call the provider gateway, streamed or not
//! 3. on success estimate tokens, price the call and accumulate usage
//! 4. attach alerts computed from the fresh snapshot
//!
//! Rejected and failed requests are never billed. A rejected request never
//! reaches a provider.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cache::ResponseCache;
use super::cost::PriceTable;
use super::gateway::{GatewayError, GatewayReply, GatewayStream, ProviderGateway};
use super::policy::{self, Alert, RejectionReason, UsageReport};
use super::providers::{HuggingFaceClient, OpenAIClient};
use super::telemetry::{spawn_usage_log, SupabaseUsageLog, UsageLogEntry, UsageLogSink};
use super::usage::UsageStore;
use super::{ChatMessage, Clock, ProviderPreference, ProviderSlot, SystemClock};
use crate::config::{LimitsConfig, Settings};

/// Buffered stream events per request before the producer waits
const STREAM_CHANNEL_CAPACITY: usize = 32;

/// Body of the chat endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub provider_preference: ProviderPreference,
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(user_id: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            user_id: user_id.into(),
            messages,
            provider_preference: ProviderPreference::Auto,
            stream: false,
        }
    }

    pub fn with_preference(mut self, preference: ProviderPreference) -> Self {
        self.provider_preference = preference;
        self
    }

    pub fn streamed(mut self) -> Self {
        self.stream = true;
        self
    }

    /// Reject requests that cannot be attributed or answered
    pub fn validate(&self) -> Result<(), String> {
        if self.user_id.trim().is_empty() {
            return Err("user_id must not be empty".to_string());
        }
        if self.messages.is_empty() {
            return Err("messages must not be empty".to_string());
        }
        Ok(())
    }
}

/// Accepted, fully generated reply
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub text: String,
    pub provider_used: ProviderSlot,
    pub provider_name: String,
    pub model: String,
    pub fallback_used: bool,
    pub usage: UsageReport,
    pub alerts: Vec<Alert>,
    pub will_use_paid: bool,
    pub cached: bool,
}

/// Policy rejection. Not an error: the caller is simply over a limit.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRejection {
    pub rejected: bool,
    pub reason: RejectionReason,
    pub usage: UsageReport,
}

/// Upstream failure after the gateway gave up
#[derive(Debug, Clone, Serialize)]
pub struct ChatFailure {
    pub error: bool,
    pub message: String,
    #[serde(skip)]
    pub bad_request: bool,
}

impl From<&GatewayError> for ChatFailure {
    fn from(error: &GatewayError) -> Self {
        Self {
            error: true,
            message: error.user_message(),
            bad_request: error.is_bad_request(),
        }
    }
}

/// Events of a streamed reply, in order: any number of fragments, then
/// exactly one of `Done` or `Error`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamEvent {
    Fragment { text: String },
    Done { usage: UsageReport, alerts: Vec<Alert> },
    Error { message: String },
}

/// Accepted reply that is still being generated
#[derive(Debug)]
pub struct ChatStream {
    pub provider_used: ProviderSlot,
    pub provider_name: String,
    pub model: String,
    pub fallback_used: bool,
    pub will_use_paid: bool,
    pub events: ReceiverStream<ChatStreamEvent>,
}

/// Result of one chat request
#[derive(Debug)]
pub enum ChatOutcome {
    Accepted(ChatReply),
    Streaming(ChatStream),
    Rejected(ChatRejection),
    Failed(ChatFailure),
}

/// Usage report for one user, as served by the usage endpoint
#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub user_id: String,
    pub usage: UsageReport,
    pub alerts: Vec<Alert>,
}

/// Who served a reply, for billing and logging
struct Served<'a> {
    slot: ProviderSlot,
    provider_name: &'a str,
    model: &'a str,
    fallback_used: bool,
    will_use_paid: bool,
    cached: bool,
}

/// Ties the usage store, limit policy, gateway and price table together
#[derive(Clone)]
pub struct RequestOrchestrator {
    store: Arc<UsageStore>,
    gateway: ProviderGateway,
    prices: Arc<PriceTable>,
    limits: LimitsConfig,
    clock: Arc<dyn Clock>,
    usage_log: Option<Arc<dyn UsageLogSink>>,
    cache: Option<Arc<ResponseCache>>,
}

impl RequestOrchestrator {
    pub fn new(
        store: Arc<UsageStore>,
        gateway: ProviderGateway,
        prices: Arc<PriceTable>,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            prices,
            limits,
            clock: Arc::new(SystemClock),
            usage_log: None,
            cache: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_usage_log(mut self, sink: Arc<dyn UsageLogSink>) -> Self {
        self.usage_log = Some(sink);
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache).filter(|c| c.is_enabled());
        self
    }

    /// Wire the production providers, price table and optional side channels
    pub fn from_settings(settings: &Settings) -> crate::Result<Self> {
        let timeout = Duration::from_secs(settings.providers.timeout_secs);

        let primary = OpenAIClient::new(&settings.providers.openai, timeout)?;
        if !primary.is_configured() {
            warn!("OPENAI_API_KEY not set; primary provider calls will fail");
        }
        let secondary = HuggingFaceClient::new(&settings.providers.huggingface, timeout)?;
        if !secondary.is_configured() {
            warn!("HUGGINGFACE_API_KEY not set; secondary provider calls will fail");
        }

        let gateway = ProviderGateway::new(Arc::new(primary), Arc::new(secondary));
        let mut orchestrator = Self::new(
            Arc::new(UsageStore::new()),
            gateway,
            Arc::new(PriceTable::with_default_pricing()),
            settings.limits.clone(),
        );

        if let Some(sink) = SupabaseUsageLog::from_config(&settings.telemetry, timeout)? {
            info!("Usage logging enabled: {}", sink.endpoint());
            orchestrator = orchestrator.with_usage_log(Arc::new(sink));
        }

        let ttl = settings.maintenance.response_cache_ttl_secs;
        if ttl > 0 {
            info!("Response cache enabled with a {}s TTL", ttl);
            orchestrator = orchestrator.with_cache(Arc::new(ResponseCache::new(ttl)));
        }

        Ok(orchestrator)
    }

    pub fn store(&self) -> &Arc<UsageStore> {
        &self.store
    }

    pub fn prices(&self) -> &Arc<PriceTable> {
        &self.prices
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    pub async fn handle_chat_request(&self, request: ChatRequest) -> ChatOutcome {
        let now = self.clock.now();
        let preference = request.provider_preference;

        debug!(
            "Chat request from {}: {} messages, provider={}, stream={}",
            request.user_id,
            request.messages.len(),
            preference,
            request.stream
        );

        self.store.ensure_user(&request.user_id, now);
        let admission = self.store.admit(&request.user_id, now, &self.limits);

        if let Some(reason) = admission.decision.rejection_reason() {
            warn!("Rejected chat request from {}: {}", request.user_id, reason);
            return ChatOutcome::Rejected(ChatRejection {
                rejected: true,
                reason,
                usage: UsageReport::new(&admission.snapshot, &self.limits),
            });
        }

        let will_use_paid = admission.decision.will_use_paid;
        if will_use_paid {
            info!("User {} is past the free quota; serving as paid overflow", request.user_id);
        }

        if request.stream {
            return self.start_stream(request, will_use_paid).await;
        }

        let cache_key = self
            .cache
            .as_ref()
            .map(|_| ResponseCache::key(&request.messages, preference));

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(reply) = cache.get(key, now) {
                debug!("Cache hit for {}", request.user_id);
                return ChatOutcome::Accepted(self.bill_reply(&request, reply, will_use_paid, true));
            }
        }

        match self.gateway.complete(&request.messages, preference).await {
            Ok(reply) => {
                if reply.fallback_used {
                    info!(
                        "Served {} from fallback provider {}",
                        request.user_id, reply.provider_name
                    );
                }
                if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
                    cache.insert(key, reply.clone(), self.clock.now());
                }
                ChatOutcome::Accepted(self.bill_reply(&request, reply, will_use_paid, false))
            }
            Err(e) => {
                error!("Chat request from {} failed: {}", request.user_id, e);
                ChatOutcome::Failed(ChatFailure::from(&e))
            }
        }
    }

    fn bill_reply(
        &self,
        request: &ChatRequest,
        reply: GatewayReply,
        will_use_paid: bool,
        cached: bool,
    ) -> ChatReply {
        let (usage, alerts) = self.settle(
            &request.user_id,
            &request.messages,
            &reply.text,
            Served {
                slot: reply.provider,
                provider_name: &reply.provider_name,
                model: &reply.model,
                fallback_used: reply.fallback_used,
                will_use_paid,
                cached,
            },
        );

        ChatReply {
            text: reply.text,
            provider_used: reply.provider,
            provider_name: reply.provider_name,
            model: reply.model,
            fallback_used: reply.fallback_used,
            usage,
            alerts,
            will_use_paid,
            cached,
        }
    }

    /// Bill one served reply and report the resulting usage
    fn settle(
        &self,
        user_id: &str,
        messages: &[ChatMessage],
        text: &str,
        served: Served<'_>,
    ) -> (UsageReport, Vec<Alert>) {
        let input_tokens = estimate_input_tokens(messages);
        let output_tokens = estimate_tokens(text);
        let cost = if served.cached {
            0.0
        } else {
            self.prices
                .cost(served.provider_name, served.model, input_tokens, output_tokens)
        };

        let now = self.clock.now();
        self.store.accumulate(user_id, input_tokens, output_tokens, cost, now);
        let snapshot = self.store.snapshot(user_id, now);
        let alerts = policy::alerts(&snapshot, &self.limits);

        if let Some(sink) = &self.usage_log {
            spawn_usage_log(
                sink.clone(),
                UsageLogEntry {
                    id: Uuid::new_v4(),
                    user_id: user_id.to_string(),
                    provider: served.slot,
                    provider_name: served.provider_name.to_string(),
                    model: served.model.to_string(),
                    input_tokens,
                    output_tokens,
                    cost,
                    fallback_used: served.fallback_used,
                    will_use_paid: served.will_use_paid,
                    cached: served.cached,
                    created_at: now,
                },
            );
        }

        (UsageReport::new(&snapshot, &self.limits), alerts)
    }

    async fn start_stream(&self, request: ChatRequest, will_use_paid: bool) -> ChatOutcome {
        let upstream = match self
            .gateway
            .stream(&request.messages, request.provider_preference)
            .await
        {
            Ok(upstream) => upstream,
            Err(e) => {
                error!("Streamed chat request from {} failed: {}", request.user_id, e);
                return ChatOutcome::Failed(ChatFailure::from(&e));
            }
        };

        if upstream.fallback_used {
            info!(
                "Streaming {} from fallback provider {}",
                request.user_id, upstream.provider_name
            );
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let stream = ChatStream {
            provider_used: upstream.provider,
            provider_name: upstream.provider_name.clone(),
            model: upstream.model.clone(),
            fallback_used: upstream.fallback_used,
            will_use_paid,
            events: ReceiverStream::new(rx),
        };

        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.forward_stream(request, upstream, will_use_paid, tx).await;
        });

        ChatOutcome::Streaming(stream)
    }

    /// Forward fragments to the caller and bill once the reply completes.
    ///
    /// A disconnected caller or an upstream error mid-reply leaves the
    /// request unbilled.
    async fn forward_stream(
        self,
        request: ChatRequest,
        upstream: GatewayStream,
        will_use_paid: bool,
        tx: mpsc::Sender<ChatStreamEvent>,
    ) {
        let GatewayStream {
            provider,
            provider_name,
            model,
            fallback_used,
            mut fragments,
        } = upstream;

        let mut text = String::new();
        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    text.push_str(&fragment);
                    if tx.send(ChatStreamEvent::Fragment { text: fragment }).await.is_err() {
                        warn!("Client of {} disconnected mid-stream; not billing", request.user_id);
                        return;
                    }
                }
                Err(e) => {
                    error!(
                        "Stream from {} for {} failed mid-reply: {}",
                        provider_name, request.user_id, e
                    );
                    let failure = GatewayError::ProviderFailed { slot: provider, source: e };
                    let _ = tx
                        .send(ChatStreamEvent::Error {
                            message: failure.user_message(),
                        })
                        .await;
                    return;
                }
            }
        }

        let (usage, alerts) = self.settle(
            &request.user_id,
            &request.messages,
            &text,
            Served {
                slot: provider,
                provider_name: &provider_name,
                model: &model,
                fallback_used,
                will_use_paid,
                cached: false,
            },
        );

        if tx.send(ChatStreamEvent::Done { usage, alerts }).await.is_err() {
            debug!("Client of {} left before the final event", request.user_id);
        }
    }

    /// Usage and alerts for one user
    pub fn usage_summary(&self, user_id: &str) -> UsageSummary {
        let snapshot = self.store.snapshot(user_id, self.clock.now());
        UsageSummary {
            user_id: user_id.to_string(),
            usage: UsageReport::new(&snapshot, &self.limits),
            alerts: policy::alerts(&snapshot, &self.limits),
        }
    }

    /// Administrative reset of all usage counters and cached replies
    pub fn clear_usage(&self) -> usize {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
        let cleared = self.store.clear();
        info!("Cleared usage for {} users", cleared);
        cleared
    }

    /// One maintenance pass: sweep stale users and expired cache entries
    pub fn run_maintenance(&self) -> (usize, usize) {
        let now = self.clock.now();
        let swept = self.store.sweep(now);
        let purged = self
            .cache
            .as_ref()
            .map(|cache| cache.purge_expired(now))
            .unwrap_or(0);
        (swept, purged)
    }

    /// Run [`Self::run_maintenance`] every `interval`. A zero interval disables it.
    pub fn spawn_maintenance(&self, interval: Duration) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }

        let orchestrator = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let (swept, purged) = orchestrator.run_maintenance();
                if swept > 0 || purged > 0 {
                    info!("Maintenance removed {} stale users, {} cached replies", swept, purged);
                } else {
                    debug!("Maintenance pass found nothing to remove");
                }
            }
        }))
    }
}

/// Crude token estimate: a quarter of the character count, rounded up
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    (chars + 3) / 4
}

/// Input estimate: each message rounded up separately, then summed
pub fn estimate_input_tokens(messages: &[ChatMessage]) -> u64 {
    messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}
