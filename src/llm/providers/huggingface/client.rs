//! Hugging Face inference client (secondary provider)
//!
//! The inference API takes a single prompt string, so the chat history is
//! flattened into the `[INST]` format instruct models expect. No native
//! streaming; the trait default yields the whole reply as one fragment.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error};

use crate::config::HuggingFaceConfig;
use crate::llm::providers::LLMProviderClient;
use crate::llm::{ChatCompletion, ChatMessage, LLMError, LLMResult, MessageRole};

use super::types::{HuggingFaceParameters, HuggingFaceRequest, HuggingFaceResponse};

pub const PROVIDER_NAME: &str = "huggingface";

pub struct HuggingFaceClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl HuggingFaceClient {
    pub fn new(config: &HuggingFaceConfig, timeout: Duration) -> crate::Result<Self> {
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
            .ok_or_else(|| LLMError::NotConfigured("HUGGINGFACE_API_KEY is not set".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| LLMError::Internal(format!("Invalid API key format: {}", e)))?,
        );
        Ok(headers)
    }
}

/// Flatten a chat into an instruct prompt.
///
/// System text is folded into the next user turn.
pub fn build_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    let mut pending_system: Vec<&str> = Vec::new();

    for message in messages {
        match message.role {
            MessageRole::System => pending_system.push(&message.content),
            MessageRole::User => {
                let mut turn = pending_system.join("\n");
                if !turn.is_empty() {
                    turn.push_str("\n\n");
                }
                turn.push_str(&message.content);
                pending_system.clear();
                prompt.push_str(&format!("[INST] {} [/INST]", turn));
            }
            MessageRole::Assistant => {
                prompt.push(' ');
                prompt.push_str(&message.content);
                prompt.push(' ');
            }
        }
    }

    if !pending_system.is_empty() {
        prompt.push_str(&format!("[INST] {} [/INST]", pending_system.join("\n")));
    }

    prompt
}

fn into_text(response: HuggingFaceResponse) -> LLMResult<String> {
    match response {
        HuggingFaceResponse::Generations(generations) => generations
            .into_iter()
            .next()
            .map(|g| g.generated_text.trim().to_string())
            .ok_or_else(|| LLMError::Parse("Hugging Face returned no generations".to_string())),
        HuggingFaceResponse::Generation(generation) => {
            Ok(generation.generated_text.trim().to_string())
        }
        HuggingFaceResponse::Error(e) => Err(LLMError::Upstream {
            status: 503,
            message: match e.estimated_time {
                Some(secs) => format!("{} (model loading, ~{:.0}s)", e.error, secs),
                None => e.error,
            },
        }),
    }
}

#[async_trait]
impl LLMProviderClient for HuggingFaceClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat_completion(&self, messages: &[ChatMessage]) -> LLMResult<ChatCompletion> {
        let headers = self.build_headers()?;
        let request_url = format!("{}/{}", self.base_url, self.model);
        let payload = HuggingFaceRequest {
            inputs: build_prompt(messages),
            parameters: HuggingFaceParameters::default(),
        };

        debug!("Hugging Face API Request: URL={}", request_url);

        let response = self
            .client
            .post(&request_url)
            .headers(headers)
            .json(&payload)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            error!("Hugging Face API Error: {} - {}", status, error_text);
            return Err(LLMError::from_status(status, error_text));
        }

        let body: HuggingFaceResponse = response
            .json()
            .await
            .map_err(|e| LLMError::Parse(e.to_string()))?;

        Ok(ChatCompletion {
            text: into_text(body)?,
            provider_name: PROVIDER_NAME.to_string(),
            model: self.model.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_folds_system_into_user_turn() {
        let prompt = build_prompt(&[
            ChatMessage::system("You are a dealership assistant."),
            ChatMessage::user("Do you have SUVs?"),
            ChatMessage::assistant("Yes, three."),
            ChatMessage::user("Prices?"),
        ]);

        assert_eq!(
            prompt,
            "[INST] You are a dealership assistant.\n\nDo you have SUVs? [/INST] Yes, three. [INST] Prices? [/INST]"
        );
    }

    #[test]
    fn test_response_shapes() {
        let list: HuggingFaceResponse =
            serde_json::from_str(r#"[{"generated_text":" We do. "}]"#).unwrap();
        assert_eq!(into_text(list).unwrap(), "We do.");

        let single: HuggingFaceResponse =
            serde_json::from_str(r#"{"generated_text":"ok"}"#).unwrap();
        assert_eq!(into_text(single).unwrap(), "ok");

        let loading: HuggingFaceResponse =
            serde_json::from_str(r#"{"error":"Model is loading","estimated_time":20.0}"#).unwrap();
        assert!(matches!(into_text(loading), Err(LLMError::Upstream { status: 503, .. })));

        let empty: HuggingFaceResponse = serde_json::from_str("[]").unwrap();
        assert!(into_text(empty).is_err());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let client =
            HuggingFaceClient::new(&HuggingFaceConfig::default(), Duration::from_secs(5)).unwrap();
        assert!(!client.is_configured());
        assert_eq!(client.name(), "huggingface");

        let result = client.chat_completion(&[ChatMessage::user("hi")]).await;
        assert!(matches!(result, Err(LLMError::NotConfigured(_))));
    }
}
