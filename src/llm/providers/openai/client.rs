//! OpenAI provider client implementation
//!
//! Speaks the OpenAI chat-completions protocol against any compatible base
//! URL. This is the primary provider and the only one that streams natively.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error};

use crate::config::OpenAIConfig;
use crate::llm::providers::{FragmentStream, LLMProviderClient};
use crate::llm::sse::{response_to_sse_stream, SseEvent};
use crate::llm::{ChatCompletion, ChatMessage, LLMError, LLMResult};

use super::types::{OpenAIError, OpenAIRequest, OpenAIResponse, OpenAIStreamingChunk};

/// Name used for this provider in the price table and usage logs
pub const PROVIDER_NAME: &str = "openai";

/// OpenAI provider client
pub struct OpenAIClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl OpenAIClient {
    pub fn new(config: &OpenAIConfig, timeout: Duration) -> crate::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn build_headers(&self) -> LLMResult<HeaderMap> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LLMError::NotConfigured("OPENAI_API_KEY is not set".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| LLMError::Internal(format!("Invalid API key format: {}", e)))?,
        );
        Ok(headers)
    }

    fn convert_request(&self, messages: &[ChatMessage], stream: bool) -> OpenAIRequest {
        OpenAIRequest {
            model: self.model.clone(),
            messages: messages.iter().map(Into::into).collect(),
            temperature: Some(0.7),
            max_tokens: Some(1000),
            stream,
        }
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> LLMResult<reqwest::Response> {
        let headers = self.build_headers()?;
        let request_url = format!("{}/chat/completions", self.base_url);

        debug!("OpenAI API Request: URL={}, Model={}, stream={}", request_url, self.model, stream);

        let response = self
            .client
            .post(&request_url)
            .headers(headers)
            .json(&self.convert_request(messages, stream))
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            error!("OpenAI API Error: {} - {}", status, error_text);
            return Err(handle_error_response(status, &error_text));
        }

        Ok(response)
    }
}

/// Map an error response, preferring the message from OpenAI's error body
fn handle_error_response(status_code: u16, error_text: &str) -> LLMError {
    let message = serde_json::from_str::<OpenAIError>(error_text)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| error_text.to_string());
    LLMError::from_status(status_code, message)
}

/// Text carried by one streamed event. `Ok(None)` for events with no text.
fn event_to_fragment(event: &SseEvent) -> LLMResult<Option<String>> {
    if event.data.trim().is_empty() || event.is_done() {
        return Ok(None);
    }

    let chunk: OpenAIStreamingChunk = serde_json::from_str(&event.data)
        .map_err(|e| LLMError::Parse(format!("Failed to parse OpenAI stream chunk: {}", e)))?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

#[async_trait]
impl LLMProviderClient for OpenAIClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat_completion(&self, messages: &[ChatMessage]) -> LLMResult<ChatCompletion> {
        let response = self.send(messages, false).await?;

        let openai_response: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| LLMError::Parse(e.to_string()))?;

        let text = openai_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LLMError::Parse("OpenAI response had no message content".to_string()))?;

        // Responses name a dated snapshot (gpt-4o-mini-2024-07-18); the
        // configured alias is what the price table knows
        if let Some(served) = &openai_response.model {
            debug!("OpenAI served {} for {}", served, self.model);
        }

        Ok(ChatCompletion {
            text,
            provider_name: PROVIDER_NAME.to_string(),
            model: self.model.clone(),
        })
    }

    async fn chat_completion_stream(&self, messages: &[ChatMessage]) -> LLMResult<FragmentStream> {
        let response = self.send(messages, true).await?;

        // [DONE] ends the stream even if the connection stays open
        let fragments = response_to_sse_stream(response)
            .take_while(|event| {
                let done = matches!(event, Ok(e) if e.is_done());
                futures::future::ready(!done)
            })
            .filter_map(|event| async move {
                match event {
                    Ok(event) => event_to_fragment(&event).transpose(),
                    Err(e) => Some(Err(e)),
                }
            });

        Ok(fragments.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_key: Option<&str>) -> OpenAIClient {
        let config = OpenAIConfig {
            api_key: api_key.map(str::to_string),
            base_url: "https://api.openai.com/v1/".to_string(),
            model: "gpt-4o-mini".to_string(),
        };
        OpenAIClient::new(&config, Duration::from_secs(5)).unwrap()
    }

    fn data(payload: &str) -> SseEvent {
        SseEvent {
            event_type: None,
            data: payload.to_string(),
            id: None,
        }
    }

    #[test]
    fn test_client_creation() {
        let client = client(Some("sk-test"));
        assert_eq!(client.name(), "openai");
        assert_eq!(client.model(), "gpt-4o-mini");
        assert_eq!(client.base_url, "https://api.openai.com/v1");
        assert!(client.is_configured());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let client = client(None);
        assert!(!client.is_configured());

        let result = client.chat_completion(&[ChatMessage::user("hi")]).await;
        assert!(matches!(result, Err(LLMError::NotConfigured(_))));
    }

    #[test]
    fn test_convert_request() {
        let client = client(Some("sk-test"));
        let request = client.convert_request(
            &[ChatMessage::system("You sell cars"), ChatMessage::user("Hello")],
            true,
        );

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hello");
    }

    #[test]
    fn test_delta_parsing() {
        let event = data(
            r#"{"id":"test","object":"chat.completion.chunk","created":1234567890,"model":"gpt-4o-mini","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}"#,
        );
        assert_eq!(event_to_fragment(&event).unwrap(), Some("Hello".to_string()));

        let role_only = data(r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#);
        assert_eq!(event_to_fragment(&role_only).unwrap(), None);

        assert_eq!(event_to_fragment(&data("[DONE]")).unwrap(), None);
        assert!(event_to_fragment(&data("{not json")).is_err());
    }

    #[test]
    fn test_error_body_message_is_used() {
        let error = handle_error_response(
            400,
            r#"{"error":{"message":"context too long","type":"invalid_request_error"}}"#,
        );
        assert!(matches!(error, LLMError::InvalidRequest(ref m) if m == "context too long"));

        let error = handle_error_response(503, "gateway down");
        assert!(matches!(error, LLMError::Upstream { status: 503, .. }));
    }
}
