//! Gemini `generateContent` extractor using a response schema.

use async_trait::async_trait;
use codecheck_shared::{CodeCheckError, GeminiConfig, Result, resolve_secret};
use reqwest::Client;
use serde_json::json;
use tracing::{debug, instrument};

use crate::{
    ExtractionShape, Extractor, build_client, endpoint, extraction_prompt, parse_model_json,
    send_json,
};

pub struct GeminiExtractor {
    client: Client,
    api_key: String,
    model: String,
    url: String,
}

impl GeminiExtractor {
    /// Build from config, reading the key from the configured env var.
    pub fn from_config(config: &GeminiConfig) -> Result<Self> {
        let api_key = resolve_secret(&config.api_key_env)?;
        Self::new(api_key, config)
    }

    pub fn new(api_key: String, config: &GeminiConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            api_key,
            url: endpoint(
                &config.base_url,
                &format!("models/{}:generateContent", config.model),
            ),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Extractor for GeminiExtractor {
    fn name(&self) -> &'static str {
        "gemini"
    }

    #[instrument(skip_all, fields(model = %self.model, shape = %shape.name))]
    async fn extract(
        &self,
        content: &str,
        shape: &ExtractionShape,
        instructions: &str,
    ) -> Result<serde_json::Value> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": extraction_prompt(instructions, content) }],
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": shape.openapi_schema,
            },
        });

        let data = send_json(
            self.client
                .post(&self.url)
                .header("x-goog-api-key", &self.api_key)
                .json(&payload),
            "gemini",
        )
        .await?;

        let candidate = &data["candidates"][0];
        let parts = candidate["content"]["parts"].as_array().ok_or_else(|| {
            let reason = candidate["finishReason"].as_str().unwrap_or("no candidates");
            CodeCheckError::parse(format!("gemini: response has no content ({reason})"))
        })?;
        let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();

        debug!(output_len = text.len(), "extraction complete");
        parse_model_json("gemini", &text)
    }
}
