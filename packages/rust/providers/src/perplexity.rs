//! Perplexity chat-completions search backend.

use async_trait::async_trait;
use codecheck_shared::{CodeCheckError, PerplexityConfig, Result, resolve_secret};
use reqwest::Client;
use serde_json::json;
use tracing::{debug, instrument};

use crate::{SearchProvider, SearchResult, build_client, endpoint, send_json};

/// Web search through Perplexity's `sonar` models.
pub struct PerplexityClient {
    client: Client,
    api_key: String,
    model: String,
    url: String,
}

impl PerplexityClient {
    /// Build from config, reading the key from the configured env var.
    pub fn from_config(config: &PerplexityConfig) -> Result<Self> {
        let api_key = resolve_secret(&config.api_key_env)?;
        Self::new(api_key, config)
    }

    pub fn new(api_key: String, config: &PerplexityConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            api_key,
            model: config.model.clone(),
            url: endpoint(&config.base_url, "chat/completions"),
        })
    }
}

#[async_trait]
impl SearchProvider for PerplexityClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn search(&self, query: &str, system_prompt: &str) -> Result<SearchResult> {
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": query },
            ],
        });

        let data = send_json(
            self.client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&payload),
            "perplexity",
        )
        .await?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                CodeCheckError::parse("perplexity: response has no choices[0].message.content")
            })?
            .to_string();

        let citations: Vec<String> = data["citations"]
            .as_array()
            .map(|urls| {
                urls.iter()
                    .filter_map(|u| u.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        debug!(
            content_len = content.len(),
            citations = citations.len(),
            "search complete"
        );
        Ok(SearchResult { content, citations })
    }
}
