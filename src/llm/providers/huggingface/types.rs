//! Hugging Face inference API wire types

use serde::{Deserialize, Serialize};

/// Request body for `POST {base_url}/{model}`
#[derive(Debug, Clone, Serialize)]
pub struct HuggingFaceRequest {
    pub inputs: String,
    pub parameters: HuggingFaceParameters,
}

#[derive(Debug, Clone, Serialize)]
pub struct HuggingFaceParameters {
    pub max_new_tokens: u32,
    pub temperature: f64,
    pub return_full_text: bool,
}

impl Default for HuggingFaceParameters {
    fn default() -> Self {
        Self {
            max_new_tokens: 500,
            temperature: 0.7,
            return_full_text: false,
        }
    }
}

/// Text-generation answers come back as a list or, from some
/// deployments, as a single object. Errors use `{"error": ...}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum HuggingFaceResponse {
    Generations(Vec<HuggingFaceGeneration>),
    Generation(HuggingFaceGeneration),
    Error(HuggingFaceError),
}

#[derive(Debug, Deserialize)]
pub struct HuggingFaceGeneration {
    pub generated_text: String,
}

#[derive(Debug, Deserialize)]
pub struct HuggingFaceError {
    pub error: String,
    #[serde(default)]
    pub estimated_time: Option<f64>,
}
