//! End-to-end research pipeline: address → jurisdiction → 12 topics → form.
//!
//! Steps run strictly one after another. The location step comes first
//! because every later query is worded around the jurisdiction it finds.
//! The first failing step aborts the run; an empty search result is not a
//! failure and leaves that section all-absent.

use std::time::Instant;

use async_trait::async_trait;
use codecheck_shared::{Result, SECTION_COUNT};
use tracing::{info, instrument};

use crate::research::ResearchAgent;
use crate::sections::{CodeCheckForm, Section, SectionDocument, SectionSlot};

/// Receives each section as soon as its step finishes.
#[async_trait]
pub trait SectionSink: Send + Sync {
    /// `completed` counts finished sections including this one (1..=13).
    /// An error aborts the run.
    async fn section_done(&self, doc: &SectionDocument, completed: usize) -> Result<()>;
}

/// Sink that ignores sections, for callers that only want the final form.
pub struct NoopSink;

#[async_trait]
impl SectionSink for NoopSink {
    async fn section_done(&self, _doc: &SectionDocument, _completed: usize) -> Result<()> {
        Ok(())
    }
}

/// Research every section for `address`, in registry order.
#[instrument(skip_all, fields(address = %address, extractor = agent.extractor_name()))]
pub async fn run(
    agent: &ResearchAgent,
    address: &str,
    sink: &dyn SectionSink,
) -> Result<CodeCheckForm> {
    let start = Instant::now();
    let mut form = CodeCheckForm::default();

    // Phase 1: jurisdiction, shared as context by every later step
    let location = agent.research_jurisdiction(address).await?;
    let doc = location.clone().into_document();
    sink.section_done(&doc, 1).await?;
    form.assign(doc);

    // Phase 2: remaining topics
    for (i, slot) in SectionSlot::ALL.into_iter().skip(1).enumerate() {
        let doc = agent.research_slot(slot, address, &location).await?;
        let completed = i + 2;
        sink.section_done(&doc, completed).await?;
        form.assign(doc);
        info!(section = %slot, completed, total = SECTION_COUNT, "section researched");
    }

    info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        "research pipeline complete"
    );
    Ok(form)
}
