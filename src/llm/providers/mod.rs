//! LLM Providers Module
//!
//! The uniform interface every upstream text-generation service sits behind,
//! plus the two shipped clients. Each provider has its own subdirectory:
//! - client.rs: the HTTP client implementing [`LLMProviderClient`]
//! - types.rs: provider-specific request/response types
//! - mod.rs: module exports

pub mod huggingface;
pub mod openai;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;

use crate::llm::{ChatCompletion, ChatMessage, LLMResult};

pub use huggingface::HuggingFaceClient;
pub use openai::OpenAIClient;

/// Lazy, forward-only sequence of reply fragments
pub type FragmentStream = BoxStream<'static, LLMResult<String>>;

#[async_trait]
pub trait LLMProviderClient: Send + Sync {
    /// Provider name as used in the price table
    fn name(&self) -> &str;

    /// Model this client sends requests to
    fn model(&self) -> &str;

    /// Send a chat completion request
    async fn chat_completion(&self, messages: &[ChatMessage]) -> LLMResult<ChatCompletion>;

    /// Send a streaming chat completion request.
    ///
    /// Providers without native streaming answer with one fragment holding
    /// the full reply.
    async fn chat_completion_stream(&self, messages: &[ChatMessage]) -> LLMResult<FragmentStream> {
        let completion = self.chat_completion(messages).await?;
        Ok(stream::once(async move { Ok(completion.text) }).boxed())
    }
}

/// Provider fakes driven by a fixed script, for gateway and orchestrator tests
#[cfg(test)]
pub mod scripted {
    use super::*;
    use crate::llm::LLMError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// What the fake does on each call
    #[derive(Debug, Clone)]
    pub enum Script {
        Reply(String),
        Fail(LLMError),
        /// Streaming yields these items; a full call concatenates them
        Stream(Vec<LLMResult<String>>),
        /// The stream cannot be opened at all
        StreamOpenFails(LLMError),
    }

    pub struct ScriptedProvider {
        name: String,
        model: String,
        script: Mutex<Script>,
        calls: AtomicUsize,
        stream_calls: AtomicUsize,
    }

    impl ScriptedProvider {
        pub fn new(name: &str, model: &str, script: Script) -> Self {
            Self {
                name: name.to_string(),
                model: model.to_string(),
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
                stream_calls: AtomicUsize::new(0),
            }
        }

        pub fn replying(name: &str, model: &str, text: &str) -> Self {
            Self::new(name, model, Script::Reply(text.to_string()))
        }

        pub fn failing(name: &str, model: &str, error: LLMError) -> Self {
            Self::new(name, model, Script::Fail(error))
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn stream_calls(&self) -> usize {
            self.stream_calls.load(Ordering::SeqCst)
        }

        fn script(&self) -> Script {
            self.script.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LLMProviderClient for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn model(&self) -> &str {
            &self.model
        }

        async fn chat_completion(&self, _messages: &[ChatMessage]) -> LLMResult<ChatCompletion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = match self.script() {
                Script::Reply(text) => text,
                Script::Fail(error) | Script::StreamOpenFails(error) => return Err(error),
                Script::Stream(items) => items.into_iter().collect::<LLMResult<Vec<_>>>()?.concat(),
            };
            Ok(ChatCompletion {
                text,
                provider_name: self.name.clone(),
                model: self.model.clone(),
            })
        }

        async fn chat_completion_stream(
            &self,
            messages: &[ChatMessage],
        ) -> LLMResult<FragmentStream> {
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            match self.script() {
                Script::Stream(items) => Ok(stream::iter(items).boxed()),
                Script::StreamOpenFails(error) => Err(error),
                Script::Reply(text) => Ok(stream::once(async move { Ok(text) }).boxed()),
                Script::Fail(_) => {
                    let completion = self.chat_completion(messages).await?;
                    Ok(stream::once(async move { Ok(completion.text) }).boxed())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::scripted::{Script, ScriptedProvider};
    use super::*;
    use crate::llm::LLMError;

    #[tokio::test]
    async fn test_scripted_stream_concatenates_for_full_call() {
        let provider = ScriptedProvider::new(
            "openai",
            "gpt-4o-mini",
            Script::Stream(vec![Ok("Hel".into()), Ok("lo".into())]),
        );

        let completion = provider.chat_completion(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(completion.text, "Hello");
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_default_stream_is_single_fragment() {
        struct Plain;

        #[async_trait]
        impl LLMProviderClient for Plain {
            fn name(&self) -> &str {
                "plain"
            }

            fn model(&self) -> &str {
                "plain-1"
            }

            async fn chat_completion(
                &self,
                _messages: &[ChatMessage],
            ) -> LLMResult<ChatCompletion> {
                Ok(ChatCompletion {
                    text: "whole reply".into(),
                    provider_name: "plain".into(),
                    model: "plain-1".into(),
                })
            }
        }

        let fragments: Vec<_> = Plain
            .chat_completion_stream(&[ChatMessage::user("hi")])
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].as_ref().unwrap(), "whole reply");
    }

    #[test]
    fn test_failing_provider_reports_error() {
        let provider = ScriptedProvider::failing("hf", "m", LLMError::Network("down".into()));
        tokio_test::block_on(async {
            assert!(provider.chat_completion(&[]).await.is_err());
            assert!(provider.chat_completion_stream(&[]).await.is_err());
        });
        assert_eq!(provider.calls(), 2);
        assert_eq!(provider.stream_calls(), 1);
    }
}
