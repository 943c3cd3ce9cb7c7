//! Job lifecycle: submission, claim, per-section persistence, terminal state.
//!
//! ```text
//! pending ──claim──▶ processing ──▶ completed
//!    │                   │      └──▶ failed
//!    └──────cancel───────┴─────────▶ cancelled
//! ```
//!
//! Every transition is a conditional write in the store, so a job is claimed
//! at most once and a cancelled job stays cancelled even if its worker
//! finishes later. Processing never returns a pipeline error to its caller:
//! the error is recorded on the job and reported as [`JobOutcome::Failed`].

use std::sync::Arc;

use async_trait::async_trait;
use codecheck_shared::{
    AppConfig, CodeCheckError, JobId, JobRecord, JobStatus, LlmProvider, Result, SECTION_COUNT,
    normalize_address, progress_label,
};
use codecheck_storage::JobStore;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::pipeline::{self, SectionSink};
use crate::research::ResearchAgent;
use crate::sections::SectionDocument;

/// Prefix of every recorded processing error.
const FAILURE_PREFIX: &str = "Job processing failed";

/// Builds the research agent for a job's provider.
///
/// Called once per claimed job, so configuration errors (missing keys)
/// fail that job instead of the worker.
pub trait AgentFactory: Send + Sync {
    fn build(&self, provider: LlmProvider) -> Result<ResearchAgent>;
}

/// Builds agents from the application config and environment.
pub struct ConfigAgentFactory {
    config: AppConfig,
}

impl ConfigAgentFactory {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }
}

impl AgentFactory for ConfigAgentFactory {
    fn build(&self, provider: LlmProvider) -> Result<ResearchAgent> {
        ResearchAgent::from_config(&self.config, provider)
    }
}

/// Result of processing one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed { job_id: JobId, sections_completed: usize },
    Failed { job_id: JobId, error: String },
    /// The job was cancelled while it ran; nothing further was recorded.
    Cancelled { job_id: JobId },
}

impl JobOutcome {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::Cancelled { job_id } => *job_id,
        }
    }
}

/// Drives jobs through their lifecycle against a store.
pub struct JobManager {
    store: Arc<JobStore>,
    agents: Arc<dyn AgentFactory>,
}

impl JobManager {
    pub fn new(store: Arc<JobStore>, agents: Arc<dyn AgentFactory>) -> Self {
        Self { store, agents }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Validate the address and create a `pending` job.
    pub async fn submit(&self, address: &str, provider: LlmProvider) -> Result<JobRecord> {
        let address = normalize_address(address)?;
        let job = self.store.create_job(&address, provider).await?;
        info!(job_id = %job.id, address = %job.address, provider = %provider, "job submitted");
        Ok(job)
    }

    /// `pending → processing`. Fails with `InvalidTransition` if another
    /// worker got there first.
    pub async fn claim(&self, job_id: &JobId) -> Result<JobRecord> {
        self.store.claim_job(job_id).await
    }

    /// Claim and run a job to a terminal state.
    pub async fn process(&self, job_id: &JobId) -> Result<JobOutcome> {
        let job = self.claim(job_id).await?;
        Ok(self.run_claimed(job).await)
    }

    /// Run a job this worker has already claimed.
    #[instrument(skip_all, fields(job_id = %job.id))]
    pub async fn run_claimed(&self, job: JobRecord) -> JobOutcome {
        info!(address = %job.address, provider = %job.llm_provider, "processing job");

        match self.research(&job).await {
            Ok(sections_completed) => {
                match self
                    .store
                    .complete_job(&job.id, &progress_label(sections_completed))
                    .await
                {
                    Ok(_) => {
                        info!(sections_completed, "job completed");
                        JobOutcome::Completed {
                            job_id: job.id,
                            sections_completed,
                        }
                    }
                    Err(e) => self.after_lost_write(&job.id, e).await,
                }
            }
            Err(e) => self.record_failure(&job.id, &e.to_string()).await,
        }
    }

    /// Mark a running job failed with a message (timeouts, watchdog).
    pub async fn fail(&self, job_id: &JobId, reason: &str) -> JobOutcome {
        self.record_failure(job_id, reason).await
    }

    async fn research(&self, job: &JobRecord) -> Result<usize> {
        let agent = self.agents.build(job.llm_provider)?;
        let sink = StoreSink {
            store: &self.store,
            job_id: job.id,
        };
        pipeline::run(&agent, &job.address, &sink).await?;
        Ok(SECTION_COUNT)
    }

    /// Best-effort `failed` write. A failing write is logged, never raised.
    async fn record_failure(&self, job_id: &JobId, reason: &str) -> JobOutcome {
        let message = format!("{FAILURE_PREFIX}: {reason}");
        error!(job_id = %job_id, error = %message, "job failed");

        match self.store.fail_job(job_id, &message).await {
            Ok(_) => JobOutcome::Failed {
                job_id: *job_id,
                error: message,
            },
            Err(write_err) => match self.after_lost_write(job_id, write_err).await {
                cancelled @ JobOutcome::Cancelled { .. } => cancelled,
                _ => JobOutcome::Failed {
                    job_id: *job_id,
                    error: message,
                },
            },
        }
    }

    /// A terminal write was refused or failed. Cancellation explains a
    /// refusal; anything else is a secondary failure worth an error log.
    async fn after_lost_write(&self, job_id: &JobId, write_err: CodeCheckError) -> JobOutcome {
        if let Ok(Some(job)) = self.store.get_job(job_id).await {
            if job.status == JobStatus::Cancelled {
                warn!(job_id = %job_id, "job was cancelled while running");
                return JobOutcome::Cancelled { job_id: *job_id };
            }
        }
        error!(job_id = %job_id, error = %write_err, "failed to record job outcome");
        JobOutcome::Failed {
            job_id: *job_id,
            error: format!("{FAILURE_PREFIX}: {write_err}"),
        }
    }
}

/// Persists each section and advances the job's progress.
struct StoreSink<'a> {
    store: &'a JobStore,
    job_id: JobId,
}

#[async_trait]
impl SectionSink for StoreSink<'_> {
    async fn section_done(&self, doc: &SectionDocument, completed: usize) -> Result<()> {
        let slot = doc.slot();
        self.store
            .save_section_result(&self.job_id, slot.slot_name(), &doc.to_value()?)
            .await?;
        let progress = progress_label(completed);
        self.store.update_progress(&self.job_id, &progress).await?;
        info!(job_id = %self.job_id, section = %slot, progress = %progress, "section saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sections::SectionSlot;
    use crate::testing::{MisconfiguredFactory, StubExtractor, StubFactory, StubSearch, temp_store};
    use std::sync::Mutex;

    fn manager_with(store: Arc<JobStore>, factory: impl AgentFactory + 'static) -> JobManager {
        JobManager::new(store, Arc::new(factory))
    }

    #[tokio::test]
    async fn end_to_end_completes_with_thirteen_sections() {
        let store = temp_store().await;
        let manager = manager_with(
            store.clone(),
            StubFactory::new(
                StubSearch::new("Regulations text [1].", &["http://a.example"]),
                StubExtractor::default(),
            ),
        );

        let job = manager
            .submit("123 Main St, Miami, FL", "openai".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, "0/13 sections");

        let outcome = manager.process(&job.id).await.unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Completed {
                job_id: job.id,
                sections_completed: 13
            }
        );

        let done = store.require_job(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, "13/13 sections");
        assert!(done.started_at.is_some());
        assert!(done.completed_at.is_some());
        assert!(done.error_message.is_none());

        let results = store.get_job_results(&job.id).await.unwrap();
        let names: Vec<_> = results.iter().map(|r| r.section_name.as_str()).collect();
        let expected: Vec<_> = SectionSlot::ALL.iter().map(|s| s.slot_name()).collect();
        assert_eq!(names, expected);
    }

    /// Observes the store's progress after each section write.
    struct ProgressRecorder {
        store: Arc<JobStore>,
        job_id: JobId,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SectionSink for ProgressRecorder {
        async fn section_done(&self, doc: &SectionDocument, completed: usize) -> Result<()> {
            StoreSink {
                store: &self.store,
                job_id: self.job_id,
            }
            .section_done(doc, completed)
            .await?;
            let job = self.store.require_job(&self.job_id).await?;
            self.seen.lock().unwrap().push(job.progress);
            Ok(())
        }
    }

    #[tokio::test]
    async fn progress_advances_one_section_at_a_time() {
        let store = temp_store().await;
        let job = store
            .create_job("123 Main St, Miami, FL", LlmProvider::OpenAi)
            .await
            .unwrap();
        let claimed = store.claim_job(&job.id).await.unwrap();
        assert_eq!(claimed.progress, "0/13 sections");

        let factory = StubFactory::new(StubSearch::with_content(""), StubExtractor::default());
        let agent = factory.build(LlmProvider::OpenAi).unwrap();
        let recorder = ProgressRecorder {
            store: store.clone(),
            job_id: job.id,
            seen: Mutex::new(Vec::new()),
        };
        pipeline::run(&agent, &job.address, &recorder).await.unwrap();

        let seen = recorder.seen.lock().unwrap().clone();
        let expected: Vec<_> = (1..=13).map(progress_label).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn jurisdiction_failure_records_error_and_no_sections() {
        let store = temp_store().await;
        let manager = manager_with(
            store.clone(),
            StubFactory::new(
                StubSearch::with_content("text").fail_when("official municipality"),
                StubExtractor::default(),
            ),
        );

        let job = manager
            .submit("123 Main St, Miami, FL", LlmProvider::OpenAi)
            .await
            .unwrap();
        let outcome = manager.process(&job.id).await.expect("failure is an outcome");

        let JobOutcome::Failed { error, .. } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(error.starts_with("Job processing failed: network error"));

        let failed = store.require_job(&job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some(error.as_str()));
        assert!(failed.completed_at.is_some());
        assert!(store.get_job_results(&job.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mid_run_failure_keeps_finished_sections() {
        let store = temp_store().await;
        let manager = manager_with(
            store.clone(),
            StubFactory::new(
                StubSearch::with_content("text").fail_when("'Freestanding Signs'"),
                StubExtractor::default(),
            ),
        );

        let job = manager
            .submit("123 Main St, Miami, FL", LlmProvider::Gemini)
            .await
            .unwrap();
        manager.process(&job.id).await.unwrap();

        let failed = store.require_job(&job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.progress, "3/13 sections");
        assert_eq!(store.get_job_results(&job.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_credentials_fail_the_job() {
        let store = temp_store().await;
        let manager = manager_with(store.clone(), MisconfiguredFactory);

        let job = manager
            .submit("123 Main St, Miami, FL", LlmProvider::OpenAi)
            .await
            .unwrap();
        let outcome = manager.process(&job.id).await.unwrap();
        assert!(matches!(outcome, JobOutcome::Failed { .. }));

        let failed = store.require_job(&job.id).await.unwrap();
        assert!(
            failed
                .error_message
                .unwrap()
                .contains("PERPLEXITY_API_KEY environment variable not set")
        );
    }

    #[tokio::test]
    async fn second_claim_is_refused() {
        let store = temp_store().await;
        let manager = manager_with(
            store.clone(),
            StubFactory::new(StubSearch::with_content(""), StubExtractor::default()),
        );
        let job = manager
            .submit("123 Main St, Miami, FL", LlmProvider::OpenAi)
            .await
            .unwrap();

        manager.claim(&job.id).await.unwrap();
        let err = manager.process(&job.id).await.unwrap_err();
        assert!(matches!(err, CodeCheckError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn cancelled_job_stays_cancelled() {
        let store = temp_store().await;
        let manager = manager_with(
            store.clone(),
            StubFactory::new(StubSearch::with_content(""), StubExtractor::default()),
        );
        let job = manager
            .submit("123 Main St, Miami, FL", LlmProvider::OpenAi)
            .await
            .unwrap();
        let claimed = manager.claim(&job.id).await.unwrap();
        store.cancel_job(&job.id).await.unwrap();

        let outcome = manager.run_claimed(claimed).await;
        assert_eq!(outcome, JobOutcome::Cancelled { job_id: job.id });
        let cancelled = store.require_job(&job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(cancelled.progress, "0/13 sections");
        assert!(store.get_job_results(&job.id).await.unwrap().is_empty());
    }

    /// Cancels a job from outside once a given topic is searched.
    struct CancellingSearch {
        store: Arc<JobStore>,
        job_id: JobId,
        topic: &'static str,
    }

    #[async_trait]
    impl codecheck_providers::SearchProvider for CancellingSearch {
        async fn search(
            &self,
            query: &str,
            _system_prompt: &str,
        ) -> Result<codecheck_providers::SearchResult> {
            if query.contains(self.topic) {
                self.store.cancel_job(&self.job_id).await?;
            }
            Ok(codecheck_providers::SearchResult {
                content: "Regulations text.".into(),
                citations: Vec::new(),
            })
        }
    }

    struct CancellingFactory(Arc<CancellingSearch>);

    impl AgentFactory for CancellingFactory {
        fn build(&self, _provider: LlmProvider) -> Result<ResearchAgent> {
            Ok(ResearchAgent::new(
                self.0.clone(),
                Arc::new(StubExtractor::default()),
            ))
        }
    }

    #[tokio::test]
    async fn cancel_mid_run_stores_no_further_sections() {
        let store = temp_store().await;
        let job = store
            .create_job("123 Main St, Miami, FL", LlmProvider::OpenAi)
            .await
            .unwrap();
        let manager = manager_with(
            store.clone(),
            CancellingFactory(Arc::new(CancellingSearch {
                store: store.clone(),
                job_id: job.id,
                topic: "'Projecting Signs'",
            })),
        );

        let outcome = manager.process(&job.id).await.unwrap();
        assert_eq!(outcome, JobOutcome::Cancelled { job_id: job.id });

        // Location and Wall Signs finished before the cancel
        let cancelled = store.require_job(&job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(cancelled.progress, "2/13 sections");
        let results = store.get_job_results(&job.id).await.unwrap();
        let names: Vec<_> = results.iter().map(|r| r.section_name.as_str()).collect();
        assert_eq!(names, ["location_information", "wall_signs"]);
        assert!(cancelled.error_message.is_none());
    }

    #[tokio::test]
    async fn submit_rejects_bad_address() {
        let store = temp_store().await;
        let manager = manager_with(store.clone(), MisconfiguredFactory);
        let err = manager.submit("  ab ", LlmProvider::OpenAi).await.unwrap_err();
        assert!(matches!(err, CodeCheckError::Validation { .. }));
        assert_eq!(store.count_jobs().await.unwrap(), 0);
    }
}
