//! Provider gateway
//!
//! Sends a chat to the primary or secondary provider with a single level of
//! fallback:
//!
//! ```text
//! explicit primary/secondary ── call that provider ──┬─ Ok  → Succeeded
//!                                                     └─ Err → ProviderFailed
//! auto ── primary ─┬─ Ok  → Succeeded(primary)
//!                  └─ Err → secondary ─┬─ Ok  → Succeeded(secondary, fallback)
//!                                      └─ Err → AllProvidersFailed
//! ```
//!
//! Streaming follows the same shape until the first fragment. Once a
//! fragment exists the provider is fixed for the rest of the reply.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

use super::providers::{FragmentStream, LLMProviderClient};
use super::{ChatMessage, LLMError, ProviderPreference, ProviderSlot};

/// Terminal failure of a gateway call
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// The caller pinned a provider and it failed
    #[error("{slot} provider failed: {source}")]
    ProviderFailed {
        slot: ProviderSlot,
        #[source]
        source: LLMError,
    },

    /// Auto mode: the primary failed and so did the fallback
    #[error("all providers failed (primary: {primary}; secondary: {secondary})")]
    AllProvidersFailed { primary: LLMError, secondary: LLMError },
}

impl GatewayError {
    /// True when the upstream rejected the request content itself
    pub fn is_bad_request(&self) -> bool {
        match self {
            GatewayError::ProviderFailed { source, .. } => source.is_bad_request(),
            GatewayError::AllProvidersFailed { primary, secondary } => {
                primary.is_bad_request() && secondary.is_bad_request()
            }
        }
    }

    /// Caller-facing message
    pub fn user_message(&self) -> String {
        if self.is_bad_request() {
            return "The AI service rejected this request. Please shorten or rephrase your message."
                .to_string();
        }

        match self {
            GatewayError::ProviderFailed { slot, .. } => {
                format!("The {} AI provider is unavailable. Please try again later.", slot)
            }
            GatewayError::AllProvidersFailed { .. } => {
                "All AI providers are currently unavailable. Please try again later.".to_string()
            }
        }
    }
}

/// A successful non-streamed reply
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayReply {
    pub text: String,
    pub provider: ProviderSlot,
    pub provider_name: String,
    pub model: String,
    pub fallback_used: bool,
}

/// A reply being streamed. The first fragment has already been pulled from
/// upstream, so the provider fields are final.
pub struct GatewayStream {
    pub provider: ProviderSlot,
    pub provider_name: String,
    pub model: String,
    pub fallback_used: bool,
    pub fragments: FragmentStream,
}

impl std::fmt::Debug for GatewayStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayStream")
            .field("provider", &self.provider)
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("fallback_used", &self.fallback_used)
            .finish_non_exhaustive()
    }
}

/// Primary/secondary provider pair
#[derive(Clone)]
pub struct ProviderGateway {
    primary: Arc<dyn LLMProviderClient>,
    secondary: Arc<dyn LLMProviderClient>,
}

impl ProviderGateway {
    pub fn new(primary: Arc<dyn LLMProviderClient>, secondary: Arc<dyn LLMProviderClient>) -> Self {
        Self { primary, secondary }
    }

    pub fn provider(&self, slot: ProviderSlot) -> &Arc<dyn LLMProviderClient> {
        match slot {
            ProviderSlot::Primary => &self.primary,
            ProviderSlot::Secondary => &self.secondary,
        }
    }

    async fn call(
        &self,
        slot: ProviderSlot,
        messages: &[ChatMessage],
    ) -> Result<GatewayReply, LLMError> {
        let completion = self.provider(slot).chat_completion(messages).await?;
        Ok(GatewayReply {
            text: completion.text,
            provider: slot,
            provider_name: completion.provider_name,
            model: completion.model,
            fallback_used: false,
        })
    }

    /// Full, non-streamed completion
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        preference: ProviderPreference,
    ) -> Result<GatewayReply, GatewayError> {
        let slot = match preference {
            ProviderPreference::Primary => ProviderSlot::Primary,
            ProviderPreference::Secondary => ProviderSlot::Secondary,
            ProviderPreference::Auto => return self.complete_with_fallback(messages).await,
        };

        self.call(slot, messages)
            .await
            .map_err(|source| GatewayError::ProviderFailed { slot, source })
    }

    async fn complete_with_fallback(
        &self,
        messages: &[ChatMessage],
    ) -> Result<GatewayReply, GatewayError> {
        let primary_error = match self.call(ProviderSlot::Primary, messages).await {
            Ok(reply) => return Ok(reply),
            Err(e) => e,
        };

        warn!(
            "Primary provider {} failed, falling back to {}: {}",
            self.primary.name(),
            self.secondary.name(),
            primary_error
        );

        match self.call(ProviderSlot::Secondary, messages).await {
            Ok(mut reply) => {
                info!("Fallback to {} succeeded", reply.provider_name);
                reply.fallback_used = true;
                Ok(reply)
            }
            Err(secondary) => Err(GatewayError::AllProvidersFailed {
                primary: primary_error,
                secondary,
            }),
        }
    }

    /// Streamed completion.
    ///
    /// In auto mode the primary is streamed; if it fails before yielding a
    /// fragment the secondary is called in full and its reply becomes the
    /// single fragment. An explicit preference streams that provider only.
    pub async fn stream(
        &self,
        messages: &[ChatMessage],
        preference: ProviderPreference,
    ) -> Result<GatewayStream, GatewayError> {
        let slot = match preference {
            ProviderPreference::Primary => ProviderSlot::Primary,
            ProviderPreference::Secondary => ProviderSlot::Secondary,
            ProviderPreference::Auto => return self.stream_with_fallback(messages).await,
        };

        self.open_stream(slot, messages)
            .await
            .map_err(|source| GatewayError::ProviderFailed { slot, source })
    }

    async fn stream_with_fallback(
        &self,
        messages: &[ChatMessage],
    ) -> Result<GatewayStream, GatewayError> {
        let primary_error = match self.open_stream(ProviderSlot::Primary, messages).await {
            Ok(stream) => return Ok(stream),
            Err(e) => e,
        };

        warn!(
            "Primary stream from {} failed before any output, degrading to a full {} call: {}",
            self.primary.name(),
            self.secondary.name(),
            primary_error
        );

        match self.call(ProviderSlot::Secondary, messages).await {
            Ok(reply) => {
                info!("Fallback to {} succeeded", reply.provider_name);
                let text = reply.text;
                Ok(GatewayStream {
                    provider: ProviderSlot::Secondary,
                    provider_name: reply.provider_name,
                    model: reply.model,
                    fallback_used: true,
                    fragments: stream::once(async move { Ok(text) }).boxed(),
                })
            }
            Err(secondary) => Err(GatewayError::AllProvidersFailed {
                primary: primary_error,
                secondary,
            }),
        }
    }

    /// Open a provider stream and pull its first fragment.
    ///
    /// Failing to open, an error as the first item, or an empty stream all
    /// count as failure before output.
    async fn open_stream(
        &self,
        slot: ProviderSlot,
        messages: &[ChatMessage],
    ) -> Result<GatewayStream, LLMError> {
        let provider = self.provider(slot);
        let mut upstream = provider.chat_completion_stream(messages).await?;

        let first = match upstream.next().await {
            Some(Ok(fragment)) => fragment,
            Some(Err(e)) => return Err(e),
            None => {
                return Err(LLMError::Upstream {
                    status: 502,
                    message: format!("{} closed the stream without output", provider.name()),
                })
            }
        };

        Ok(GatewayStream {
            provider: slot,
            provider_name: provider.name().to_string(),
            model: provider.model().to_string(),
            fallback_used: false,
            fragments: stream::once(async move { Ok(first) }).chain(upstream).boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::scripted::{Script, ScriptedProvider};

    fn build_gateway(
        primary: ScriptedProvider,
        secondary: ScriptedProvider,
    ) -> (ProviderGateway, Arc<ScriptedProvider>, Arc<ScriptedProvider>) {
        let primary = Arc::new(primary);
        let secondary = Arc::new(secondary);
        (
            ProviderGateway::new(primary.clone(), secondary.clone()),
            primary,
            secondary,
        )
    }

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage::user("Which trucks are in stock?")]
    }

    fn down() -> LLMError {
        LLMError::Network("connection refused".to_string())
    }

    #[tokio::test]
    async fn test_auto_uses_primary_when_healthy() {
        let (gateway, primary, secondary) = build_gateway(
            ScriptedProvider::replying("openai", "gpt-4o-mini", "Two trucks."),
            ScriptedProvider::replying("huggingface", "mistral", "unused"),
        );

        let reply = gateway.complete(&messages(), ProviderPreference::Auto).await.unwrap();

        assert_eq!(reply.text, "Two trucks.");
        assert_eq!(reply.provider, ProviderSlot::Primary);
        assert!(!reply.fallback_used);
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_auto_falls_back_to_secondary() {
        let (gateway, _, secondary) = build_gateway(
            ScriptedProvider::failing("openai", "gpt-4o-mini", down()),
            ScriptedProvider::replying("huggingface", "mistral", "Two trucks."),
        );

        let reply = gateway.complete(&messages(), ProviderPreference::Auto).await.unwrap();

        assert_eq!(reply.provider, ProviderSlot::Secondary);
        assert_eq!(reply.provider_name, "huggingface");
        assert!(reply.fallback_used);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn test_auto_both_fail() {
        let (gateway, _, _) = build_gateway(
            ScriptedProvider::failing("openai", "gpt-4o-mini", down()),
            ScriptedProvider::failing("huggingface", "mistral", LLMError::Upstream {
                status: 503,
                message: "loading".to_string(),
            }),
        );

        let error = gateway.complete(&messages(), ProviderPreference::Auto).await.unwrap_err();

        assert!(matches!(error, GatewayError::AllProvidersFailed { .. }));
        assert!(!error.is_bad_request());
        assert!(error.user_message().contains("All AI providers"));
    }

    #[tokio::test]
    async fn test_explicit_provider_gets_no_fallback() {
        let (gateway, _, secondary) = build_gateway(
            ScriptedProvider::failing("openai", "gpt-4o-mini", down()),
            ScriptedProvider::replying("huggingface", "mistral", "unused"),
        );

        let error = gateway.complete(&messages(), ProviderPreference::Primary).await.unwrap_err();

        assert!(matches!(
            error,
            GatewayError::ProviderFailed {
                slot: ProviderSlot::Primary,
                ..
            }
        ));
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_explicit_secondary() {
        let (gateway, primary, _) = build_gateway(
            ScriptedProvider::replying("openai", "gpt-4o-mini", "unused"),
            ScriptedProvider::replying("huggingface", "mistral", "From HF"),
        );

        let reply = gateway.complete(&messages(), ProviderPreference::Secondary).await.unwrap();

        assert_eq!(reply.provider, ProviderSlot::Secondary);
        assert!(!reply.fallback_used);
        assert_eq!(primary.calls(), 0);
    }

    #[tokio::test]
    async fn test_bad_request_message() {
        let (gateway, _, _) = build_gateway(
            ScriptedProvider::failing(
                "openai",
                "gpt-4o-mini",
                LLMError::InvalidRequest("too long".into()),
            ),
            ScriptedProvider::replying("huggingface", "mistral", "unused"),
        );

        let error = gateway.complete(&messages(), ProviderPreference::Primary).await.unwrap_err();
        assert!(error.is_bad_request());
        assert!(error.user_message().contains("rejected"));
    }

    #[tokio::test]
    async fn test_stream_forwards_primary_fragments() {
        let (gateway, _, secondary) = build_gateway(
            ScriptedProvider::new(
                "openai",
                "gpt-4o-mini",
                Script::Stream(vec![Ok("Two ".into()), Ok("trucks.".into())]),
            ),
            ScriptedProvider::replying("huggingface", "mistral", "unused"),
        );

        let stream = gateway.stream(&messages(), ProviderPreference::Auto).await.unwrap();
        assert_eq!(stream.provider, ProviderSlot::Primary);
        assert!(!stream.fallback_used);

        let fragments: Vec<String> = stream.fragments.map(|f| f.unwrap()).collect().await;
        assert_eq!(fragments, vec!["Two ".to_string(), "trucks.".to_string()]);
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_stream_degrades_to_secondary_before_first_fragment() {
        for script in [
            Script::StreamOpenFails(down()),
            Script::Stream(vec![Err(down())]),
            Script::Stream(vec![]),
        ] {
            let (gateway, _, secondary) = build_gateway(
                ScriptedProvider::new("openai", "gpt-4o-mini", script),
                ScriptedProvider::replying("huggingface", "mistral", "Whole reply"),
            );

            let stream = gateway.stream(&messages(), ProviderPreference::Auto).await.unwrap();
            assert_eq!(stream.provider, ProviderSlot::Secondary);
            assert!(stream.fallback_used);
            assert_eq!(secondary.calls(), 1);
            assert_eq!(secondary.stream_calls(), 0);

            let fragments: Vec<String> = stream.fragments.map(|f| f.unwrap()).collect().await;
            assert_eq!(fragments, vec!["Whole reply".to_string()]);
        }
    }

    #[tokio::test]
    async fn test_stream_error_after_first_fragment_is_not_replaced() {
        let (gateway, _, secondary) = build_gateway(
            ScriptedProvider::new(
                "openai",
                "gpt-4o-mini",
                Script::Stream(vec![Ok("Two ".into()), Err(down())]),
            ),
            ScriptedProvider::replying("huggingface", "mistral", "unused"),
        );

        let stream = gateway.stream(&messages(), ProviderPreference::Auto).await.unwrap();
        let items: Vec<_> = stream.fragments.collect().await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_stream_explicit_provider_failure() {
        let (gateway, _, secondary) = build_gateway(
            ScriptedProvider::new("openai", "gpt-4o-mini", Script::StreamOpenFails(down())),
            ScriptedProvider::replying("huggingface", "mistral", "unused"),
        );

        let error = gateway.stream(&messages(), ProviderPreference::Primary).await.unwrap_err();
        assert!(matches!(error, GatewayError::ProviderFailed { .. }));
        assert_eq!(secondary.calls(), 0);
    }
}
