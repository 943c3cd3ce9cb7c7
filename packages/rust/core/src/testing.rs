//! In-crate stub backends for pipeline and lifecycle tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use codecheck_providers::{ExtractionShape, Extractor, SearchProvider, SearchResult};
use codecheck_shared::{CodeCheckError, LlmProvider, Result};
use codecheck_storage::JobStore;
use serde_json::Value;

use crate::jobs::AgentFactory;
use crate::research::ResearchAgent;

/// Returns the same content for every query, optionally failing some.
#[derive(Default)]
pub(crate) struct StubSearch {
    content: String,
    citations: Vec<String>,
    fail_when: Option<String>,
    queries: Mutex<Vec<String>>,
}

impl StubSearch {
    pub fn new(content: &str, citations: &[&str]) -> Self {
        Self {
            content: content.to_string(),
            citations: citations.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_content(content: &str) -> Self {
        Self::new(content, &[])
    }

    /// Fail with a network error for queries containing `needle`.
    pub fn fail_when(mut self, needle: &str) -> Self {
        self.fail_when = Some(needle.to_string());
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for StubSearch {
    async fn search(&self, query: &str, _system_prompt: &str) -> Result<SearchResult> {
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(needle) = &self.fail_when {
            if query.contains(needle.as_str()) {
                return Err(CodeCheckError::Network("perplexity: connection reset".into()));
            }
        }
        Ok(SearchResult {
            content: self.content.clone(),
            citations: self.citations.clone(),
        })
    }
}

/// Returns a canned object per shape name, `{}` otherwise.
#[derive(Default)]
pub(crate) struct StubExtractor {
    outputs: HashMap<String, Value>,
    calls: AtomicUsize,
    shapes: Mutex<Vec<String>>,
    contents: Mutex<Vec<String>>,
}

impl StubExtractor {
    pub fn respond(mut self, shape: &str, output: Value) -> Self {
        self.outputs.insert(shape.to_string(), output);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn shapes(&self) -> Vec<String> {
        self.shapes.lock().unwrap().clone()
    }

    pub fn last_content(&self) -> Option<String> {
        self.contents.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Extractor for StubExtractor {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn extract(
        &self,
        content: &str,
        shape: &ExtractionShape,
        _instructions: &str,
    ) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.shapes.lock().unwrap().push(shape.name.clone());
        self.contents.lock().unwrap().push(content.to_string());
        Ok(self
            .outputs
            .get(&shape.name)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())))
    }
}

/// Hands out agents over shared stub backends.
pub(crate) struct StubFactory {
    pub search: Arc<StubSearch>,
    pub extractor: Arc<StubExtractor>,
}

impl StubFactory {
    pub fn new(search: StubSearch, extractor: StubExtractor) -> Self {
        Self {
            search: Arc::new(search),
            extractor: Arc::new(extractor),
        }
    }
}

impl AgentFactory for StubFactory {
    fn build(&self, _provider: LlmProvider) -> Result<ResearchAgent> {
        Ok(ResearchAgent::new(
            self.search.clone(),
            self.extractor.clone(),
        ))
    }
}

/// Fails the way a missing provider credential does.
pub(crate) struct MisconfiguredFactory;

impl AgentFactory for MisconfiguredFactory {
    fn build(&self, _provider: LlmProvider) -> Result<ResearchAgent> {
        Err(CodeCheckError::config(
            "PERPLEXITY_API_KEY environment variable not set",
        ))
    }
}

/// A fresh store in a temp file.
pub(crate) async fn temp_store() -> Arc<JobStore> {
    temp_store_at().await.0
}

/// A fresh store plus its file path, for tests that need raw SQL access.
pub(crate) async fn temp_store_at() -> (Arc<JobStore>, PathBuf) {
    let path = std::env::temp_dir().join(format!("codecheck_core_{}.db", uuid::Uuid::now_v7()));
    let store = JobStore::open(&path).await.expect("open test db");
    (Arc::new(store), path)
}
