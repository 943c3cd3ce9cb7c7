//! OpenAI chat-completions extractor using `json_schema` structured output.

use async_trait::async_trait;
use codecheck_shared::{CodeCheckError, OpenAiConfig, Result, resolve_secret};
use reqwest::Client;
use serde_json::json;
use tracing::{debug, instrument};

use crate::{
    ExtractionShape, Extractor, build_client, endpoint, extraction_prompt, parse_model_json,
    send_json,
};

const SYSTEM_PROMPT: &str = "You are a precise data extraction expert.";

pub struct OpenAiExtractor {
    client: Client,
    api_key: String,
    model: String,
    url: String,
}

impl OpenAiExtractor {
    /// Build from config, reading the key from the configured env var.
    pub fn from_config(config: &OpenAiConfig) -> Result<Self> {
        let api_key = resolve_secret(&config.api_key_env)?;
        Self::new(api_key, config)
    }

    pub fn new(api_key: String, config: &OpenAiConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            api_key,
            model: config.model.clone(),
            url: endpoint(&config.base_url, "chat/completions"),
        })
    }
}

#[async_trait]
impl Extractor for OpenAiExtractor {
    fn name(&self) -> &'static str {
        "openai"
    }

    #[instrument(skip_all, fields(model = %self.model, shape = %shape.name))]
    async fn extract(
        &self,
        content: &str,
        shape: &ExtractionShape,
        instructions: &str,
    ) -> Result<serde_json::Value> {
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": extraction_prompt(instructions, content) },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": shape.name,
                    "schema": shape.json_schema,
                    // Optional fields are expressed as nullable, not required
                    "strict": false,
                },
            },
        });

        let data = send_json(
            self.client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&payload),
            "openai",
        )
        .await?;

        let message = &data["choices"][0]["message"];
        if let Some(refusal) = message["refusal"].as_str() {
            return Err(CodeCheckError::shape(format!("openai refused: {refusal}")));
        }
        let text = message["content"].as_str().ok_or_else(|| {
            CodeCheckError::parse("openai: response has no choices[0].message.content")
        })?;

        debug!(output_len = text.len(), "extraction complete");
        parse_model_json("openai", text)
    }
}
