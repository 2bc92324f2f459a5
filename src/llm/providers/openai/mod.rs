//! OpenAI provider module (primary provider)

pub mod client;
pub mod types;

pub use client::{OpenAIClient, PROVIDER_NAME};
pub use types::{
    OpenAIChatMessage, OpenAIError, OpenAIRequest, OpenAIResponse, OpenAIStreamingChunk,
};
