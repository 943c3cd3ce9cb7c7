//! Background worker: polls for pending jobs and runs them.
//!
//! Up to `max_concurrent_jobs` jobs run at once; each job's pipeline is
//! still strictly sequential. Every run is wrapped in a timeout that marks
//! the job failed when it fires, and each poll first sweeps `processing`
//! jobs that have been running longer than `stale_after` (left behind by a
//! crashed worker, for instance).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use codecheck_shared::{CodeCheckError, JobRecord, Result, WorkerConfig};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::jobs::{JobManager, JobOutcome};

pub struct Worker {
    manager: Arc<JobManager>,
    max_concurrent: usize,
    poll_interval: Duration,
    job_timeout: Duration,
    stale_after: Duration,
}

impl Worker {
    pub fn new(manager: Arc<JobManager>, config: &WorkerConfig) -> Self {
        Self {
            manager,
            max_concurrent: config.max_concurrent_jobs.max(1),
            poll_interval: config.poll_interval(),
            job_timeout: config.job_timeout(),
            stale_after: config.stale_after(),
        }
    }

    /// Fail `processing` jobs started more than `stale_after` ago.
    pub async fn sweep_stale(&self) -> Result<u64> {
        let age = chrono::Duration::from_std(self.stale_after)
            .map_err(|e| CodeCheckError::config(format!("[worker] stale_after_secs: {e}")))?;
        let message = format!(
            "Job processing failed: still processing after {}s",
            self.stale_after.as_secs()
        );

        let swept = self
            .manager
            .store()
            .fail_stale_jobs(Utc::now() - age, &message)
            .await?;
        if swept > 0 {
            warn!(swept, "failed stale processing jobs");
        }
        Ok(swept)
    }

    /// Process every pending job, then return. Used by `worker --once`.
    pub async fn run_once(&self) -> Result<Vec<JobOutcome>> {
        self.sweep_stale().await?;

        let mut in_flight = JoinSet::new();
        let mut outcomes = Vec::new();
        loop {
            if let Err(e) = self.fill(&mut in_flight).await {
                // Claimed jobs still run to a terminal state
                warn!(error = %e, running = in_flight.len(), "failed to claim pending jobs");
                while let Some(res) = in_flight.join_next().await {
                    log_outcome(res);
                }
                return Err(e);
            }
            match in_flight.join_next().await {
                Some(res) => {
                    if let Some(outcome) = log_outcome(res) {
                        outcomes.push(outcome);
                    }
                }
                None => break,
            }
        }
        Ok(outcomes)
    }

    /// Poll until `shutdown` resolves, then wait for running jobs.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!(
            max_concurrent = self.max_concurrent,
            poll_ms = self.poll_interval.as_millis() as u64,
            timeout_secs = self.job_timeout.as_secs(),
            "worker started"
        );

        let mut in_flight = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            if let Err(e) = self.sweep_stale().await {
                warn!(error = %e, "stale job sweep failed");
            }
            if let Err(e) = self.fill(&mut in_flight).await {
                warn!(error = %e, "failed to claim pending jobs");
            }

            tokio::select! {
                _ = &mut shutdown => break,
                Some(res) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_outcome(res);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(running = in_flight.len(), "worker stopping, waiting for running jobs");
        while let Some(res) = in_flight.join_next().await {
            log_outcome(res);
        }
        Ok(())
    }

    /// Claim pending jobs until the concurrency limit or an empty queue.
    async fn fill(&self, in_flight: &mut JoinSet<JobOutcome>) -> Result<()> {
        while in_flight.len() < self.max_concurrent {
            let Some(job) = self.claim_next().await? else {
                break;
            };
            let manager = self.manager.clone();
            let timeout = self.job_timeout;
            in_flight.spawn(run_with_timeout(manager, job, timeout));
        }
        Ok(())
    }

    /// Claim the oldest pending job, skipping ones another worker took first.
    async fn claim_next(&self) -> Result<Option<JobRecord>> {
        loop {
            let Some(job) = self.manager.store().next_pending_job().await? else {
                return Ok(None);
            };
            match self.manager.claim(&job.id).await {
                Ok(claimed) => return Ok(Some(claimed)),
                Err(CodeCheckError::InvalidTransition { .. }) => {
                    debug!(job_id = %job.id, "job claimed elsewhere, skipping");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn run_with_timeout(
    manager: Arc<JobManager>,
    job: JobRecord,
    timeout: Duration,
) -> JobOutcome {
    let job_id = job.id;
    match tokio::time::timeout(timeout, manager.run_claimed(job)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(job_id = %job_id, timeout_secs = timeout.as_secs(), "job timed out");
            manager
                .fail(&job_id, &format!("timed out after {}s", timeout.as_secs()))
                .await
        }
    }
}

fn log_outcome(res: std::result::Result<JobOutcome, JoinError>) -> Option<JobOutcome> {
    match res {
        Ok(outcome) => {
            match &outcome {
                JobOutcome::Completed {
                    job_id,
                    sections_completed,
                } => info!(job_id = %job_id, sections_completed, "job finished"),
                JobOutcome::Failed { job_id, error } => {
                    warn!(job_id = %job_id, error = %error, "job finished with failure")
                }
                JobOutcome::Cancelled { job_id } => info!(job_id = %job_id, "job cancelled"),
            }
            Some(outcome)
        }
        Err(e) => {
            error!(error = %e, "job task panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::AgentFactory;
    use crate::research::ResearchAgent;
    use crate::testing::{StubExtractor, StubFactory, StubSearch, temp_store, temp_store_at};
    use async_trait::async_trait;
    use codecheck_providers::{SearchProvider, SearchResult};
    use codecheck_shared::{JobId, JobStatus, LlmProvider};

    fn worker(manager: Arc<JobManager>) -> Worker {
        let config = WorkerConfig {
            poll_interval_ms: 20,
            max_concurrent_jobs: 2,
            ..WorkerConfig::default()
        };
        Worker::new(manager, &config)
    }

    fn fast_manager(store: Arc<codecheck_storage::JobStore>) -> Arc<JobManager> {
        Arc::new(JobManager::new(
            store,
            Arc::new(StubFactory::new(
                StubSearch::with_content(""),
                StubExtractor::default(),
            )),
        ))
    }

    struct SlowSearch;

    #[async_trait]
    impl SearchProvider for SlowSearch {
        async fn search(&self, _query: &str, _system_prompt: &str) -> Result<SearchResult> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(SearchResult::default())
        }
    }

    struct SlowFactory;

    impl AgentFactory for SlowFactory {
        fn build(&self, _provider: LlmProvider) -> Result<ResearchAgent> {
            Ok(ResearchAgent::new(
                Arc::new(SlowSearch),
                Arc::new(StubExtractor::default()),
            ))
        }
    }

    #[tokio::test]
    async fn run_once_drains_the_queue() {
        let store = temp_store().await;
        let manager = fast_manager(store.clone());
        for i in 1..=3 {
            manager
                .submit(&format!("{i}00 Main St, Miami, FL"), LlmProvider::OpenAi)
                .await
                .unwrap();
        }

        let outcomes = worker(manager).run_once().await.unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(
            outcomes
                .iter()
                .all(|o| matches!(o, JobOutcome::Completed { sections_completed: 13, .. }))
        );

        for job in store.list_jobs(10, 0).await.unwrap() {
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!(store.get_job_results(&job.id).await.unwrap().len(), 13);
        }
    }

    #[tokio::test]
    async fn timeout_marks_job_failed() {
        let store = temp_store().await;
        let manager = Arc::new(JobManager::new(store.clone(), Arc::new(SlowFactory)));
        let job = manager
            .submit("123 Main St, Miami, FL", LlmProvider::OpenAi)
            .await
            .unwrap();

        let mut worker = worker(manager);
        worker.job_timeout = Duration::from_millis(50);
        let outcomes = worker.run_once().await.unwrap();

        assert!(matches!(outcomes[0], JobOutcome::Failed { .. }));
        let failed = store.require_job(&job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn claim_error_lets_running_jobs_finish() {
        let (store, path) = temp_store_at().await;
        let manager = fast_manager(store.clone());
        let job = manager
            .submit("123 Main St, Miami, FL", LlmProvider::OpenAi)
            .await
            .unwrap();

        // A newer pending row that cannot be decoded makes the second claim fail
        let db = libsql::Builder::new_local(&path).build().await.unwrap();
        let conn = db.connect().unwrap();
        conn.execute(
            "INSERT INTO jobs (id, address, llm_provider, status, progress, created_at)
             VALUES (?1, '9 Bad Row, Miami, FL', 'claude', 'pending', '0/13 sections',
                     '2999-01-01T00:00:00.000000Z')",
            libsql::params![JobId::new().to_string()],
        )
        .await
        .unwrap();

        let err = worker(manager).run_once().await.unwrap_err();
        assert!(matches!(err, CodeCheckError::Validation { .. }));

        let job = store.require_job(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(store.get_job_results(&job.id).await.unwrap().len(), 13);
    }

    #[tokio::test]
    async fn sweep_fails_stale_processing_jobs() {
        let store = temp_store().await;
        let manager = fast_manager(store.clone());
        let job = manager
            .submit("123 Main St, Miami, FL", LlmProvider::OpenAi)
            .await
            .unwrap();
        manager.claim(&job.id).await.unwrap();

        let mut worker = worker(manager);
        assert_eq!(worker.sweep_stale().await.unwrap(), 0);

        worker.stale_after = Duration::ZERO;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(worker.sweep_stale().await.unwrap(), 1);

        let job = store.require_job(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("still processing"));
    }

    #[tokio::test]
    async fn run_processes_until_shutdown() {
        let store = temp_store().await;
        let manager = fast_manager(store.clone());
        let job = manager
            .submit("123 Main St, Miami, FL", LlmProvider::Gemini)
            .await
            .unwrap();

        worker(manager)
            .run(tokio::time::sleep(Duration::from_millis(500)))
            .await
            .unwrap();

        let job = store.require_job(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }
}
