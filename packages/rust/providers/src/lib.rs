//! Search and extraction backends for Code Check.
//!
//! Two capabilities are consumed by the research pipeline:
//! - [`SearchProvider`]: free-text web search returning content plus an
//!   ordered citation list (Perplexity).
//! - [`Extractor`]: turns annotated text into a JSON object that conforms
//!   to a requested [`ExtractionShape`] (OpenAI or Gemini).
//!
//! Backends resolve their API keys eagerly at construction, so a missing
//! credential surfaces as a [`CodeCheckError::Config`] before any request.

mod gemini;
mod openai;
mod perplexity;
mod shape;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codecheck_shared::{AppConfig, CodeCheckError, LlmProvider, Result};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

pub use gemini::GeminiExtractor;
pub use openai::OpenAiExtractor;
pub use perplexity::PerplexityClient;
pub use shape::ExtractionShape;

/// User-Agent string for provider requests.
const USER_AGENT: &str = concat!("CodeCheck/", env!("CARGO_PKG_VERSION"));

/// Longest response body excerpt kept in an error message.
const ERROR_BODY_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Output of one search round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Free-text answer.
    pub content: String,
    /// Supporting URLs, in the order the content numbers them.
    #[serde(default)]
    pub citations: Vec<String>,
}

/// A web-search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, system_prompt: &str) -> Result<SearchResult>;
}

/// A structured-output language model backend.
///
/// The returned value is the raw JSON object; callers deserialize it into
/// the section type the shape was derived from.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    async fn extract(
        &self,
        content: &str,
        shape: &ExtractionShape,
        instructions: &str,
    ) -> Result<serde_json::Value>;
}

/// Construct the extraction backend selected for a job.
pub fn build_extractor(provider: LlmProvider, config: &AppConfig) -> Result<Arc<dyn Extractor>> {
    match provider {
        LlmProvider::OpenAi => Ok(Arc::new(OpenAiExtractor::from_config(&config.openai)?)),
        LlmProvider::Gemini => Ok(Arc::new(GeminiExtractor::from_config(&config.gemini)?)),
    }
}

/// The user prompt sent to every extraction backend.
pub fn extraction_prompt(instructions: &str, content: &str) -> String {
    format!(
        "{instructions}\n\nPlease extract the following information from the text provided below:\n\n{content}"
    )
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Build a reqwest client with appropriate settings.
fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| CodeCheckError::Network(format!("failed to build HTTP client: {e}")))
}

/// Join a configured base URL and an endpoint path.
fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Send a request and decode a successful JSON response body.
async fn send_json(request: RequestBuilder, service: &str) -> Result<serde_json::Value> {
    let response = request
        .send()
        .await
        .map_err(|e| CodeCheckError::Network(format!("{service}: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| CodeCheckError::Network(format!("{service}: failed to read body: {e}")))?;

    if !status.is_success() {
        let excerpt: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        return Err(CodeCheckError::Network(format!(
            "{service}: HTTP {status}: {excerpt}"
        )));
    }

    serde_json::from_str(&body)
        .map_err(|e| CodeCheckError::parse(format!("{service}: response is not JSON: {e}")))
}

/// Parse the JSON object a model produced as text.
fn parse_model_json(service: &str, text: &str) -> Result<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(text.trim()).map_err(|e| {
        CodeCheckError::shape(format!("{service}: model output is not valid JSON: {e}"))
    })?;
    if !value.is_object() {
        return Err(CodeCheckError::shape(format!(
            "{service}: model output is not a JSON object"
        )));
    }
    Ok(value)
}
