//! Language-model generation service
//!
//! Used for answer generation and for LLM query rewriting. A failed
//! generation is terminal for the caller; the only retries are the ones
//! `RateLimitedClient` performs.

use crate::config::ServicesConfig;
use crate::errors::GenerationError;
use crate::http::{Endpoint, RateLimitedClient};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Sampling options
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    #[serde(rename = "num_predict")]
    pub max_tokens: u32,
}

impl GenerationOptions {
    pub fn from_services(services: &ServicesConfig) -> Self {
        Self {
            temperature: services.temperature,
            top_p: services.top_p,
            max_tokens: services.max_tokens,
        }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Complete `prompt`; the returned text is never empty
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    fn model_name(&self) -> &str;
}

/// Client for an Ollama-style `/api/generate` endpoint
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: RateLimitedClient,
    endpoint: Endpoint,
    model: String,
    options: GenerationOptions,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: &'a GenerationOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl HttpGenerator {
    pub fn new(client: RateLimitedClient, services: &ServicesConfig) -> Self {
        let endpoint = Endpoint::post("generation", &services.generation_url)
            .with_api_key(&services.api_key_header, services.api_key.as_deref());

        Self {
            client,
            endpoint,
            model: services.generation_model.clone(),
            options: GenerationOptions::from_services(services),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: &self.options,
        };

        let response: GenerateResponse = self.client.send_json(&self.endpoint, &request).await?;
        let text = response.response.trim();
        if text.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(text.to_string())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
