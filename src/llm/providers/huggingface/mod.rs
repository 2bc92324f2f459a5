//! Hugging Face provider module (secondary provider)

pub mod client;
pub mod types;

pub use client::{build_prompt, HuggingFaceClient, PROVIDER_NAME};
pub use types::{HuggingFaceRequest, HuggingFaceResponse};
