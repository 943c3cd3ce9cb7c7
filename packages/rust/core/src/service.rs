//! Job submission API: the credential-checked surface over the job manager.
//!
//! Every operation checks the caller's pre-shared key first; a missing or
//! wrong key never reaches the store.

use std::sync::Arc;

use codecheck_shared::{
    AppConfig, CodeCheckError, JobId, JobRecord, LlmProvider, Result, SectionResultRecord,
    validate_api_key,
};
use serde::Serialize;
use tracing::info;

use crate::jobs::JobManager;
use crate::sections::CodeCheckForm;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

/// One page of the job listing, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub jobs: Vec<JobRecord>,
    /// Exact number of jobs in the store.
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

/// A job and its stored sections, in the order they were researched.
#[derive(Debug, Clone, Serialize)]
pub struct JobResults {
    #[serde(flatten)]
    pub job: JobRecord,
    pub results: Vec<SectionResultRecord>,
}

impl JobResults {
    /// Rebuild the aggregate form from the stored sections.
    pub fn form(&self) -> CodeCheckForm {
        CodeCheckForm::from_section_records(&self.results)
    }
}

pub struct JobApi {
    config: AppConfig,
    manager: Arc<JobManager>,
}

impl JobApi {
    pub fn new(config: AppConfig, manager: Arc<JobManager>) -> Self {
        Self { config, manager }
    }

    fn authorize(&self, api_key: Option<&str>) -> Result<()> {
        validate_api_key(&self.config, api_key)
    }

    /// Submit an address for research. `llm_provider` defaults to the
    /// configured provider.
    pub async fn create_job(
        &self,
        api_key: Option<&str>,
        address: &str,
        llm_provider: Option<&str>,
    ) -> Result<JobRecord> {
        self.authorize(api_key)?;
        let provider = match llm_provider {
            Some(name) => name.parse::<LlmProvider>()?,
            None => self.config.defaults.llm_provider,
        };
        self.manager.submit(address, provider).await
    }

    pub async fn get_job(&self, api_key: Option<&str>, job_id: &str) -> Result<JobRecord> {
        self.authorize(api_key)?;
        let id: JobId = job_id.parse()?;
        self.manager.store().require_job(&id).await
    }

    pub async fn get_results(&self, api_key: Option<&str>, job_id: &str) -> Result<JobResults> {
        self.authorize(api_key)?;
        let id: JobId = job_id.parse()?;
        let job = self.manager.store().require_job(&id).await?;
        let results = self.manager.store().get_job_results(&id).await?;
        Ok(JobResults { job, results })
    }

    /// List jobs. `limit` is clamped to `1..=100` (default 50); a negative
    /// or absent offset is treated as 0.
    pub async fn list_jobs(
        &self,
        api_key: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<JobPage> {
        self.authorize(api_key)?;
        let limit = limit
            .map(|l| l.clamp(1, i64::from(MAX_PAGE_SIZE)) as u32)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let offset = offset
            .map(|o| o.clamp(0, i64::from(u32::MAX)) as u32)
            .unwrap_or(0);

        let store = self.manager.store();
        let jobs = store.list_jobs(limit, offset).await?;
        let total = store.count_jobs().await?;
        Ok(JobPage {
            jobs,
            total,
            limit,
            offset,
        })
    }

    /// Delete a job and all of its results.
    pub async fn delete_job(&self, api_key: Option<&str>, job_id: &str) -> Result<()> {
        self.authorize(api_key)?;
        let id: JobId = job_id.parse()?;
        if !self.manager.store().delete_job(&id).await? {
            return Err(CodeCheckError::NotFound(format!("job {id}")));
        }
        info!(job_id = %id, "job deleted");
        Ok(())
    }

    pub async fn cancel_job(&self, api_key: Option<&str>, job_id: &str) -> Result<JobRecord> {
        self.authorize(api_key)?;
        let id: JobId = job_id.parse()?;
        let job = self.manager.store().cancel_job(&id).await?;
        info!(job_id = %id, "job cancelled");
        Ok(job)
    }

    /// Requeue a finished job, discarding its previous results.
    pub async fn retry_job(&self, api_key: Option<&str>, job_id: &str) -> Result<JobRecord> {
        self.authorize(api_key)?;
        let id: JobId = job_id.parse()?;
        self.manager.store().requeue_job(&id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubExtractor, StubFactory, StubSearch, temp_store};
    use codecheck_shared::JobStatus;
    use std::collections::HashSet;

    const KEY: &str = "secret-key";

    /// An API whose key lives in a per-test env var.
    async fn api(env_var: &str) -> JobApi {
        // SAFETY: each test uses its own variable name.
        unsafe { std::env::set_var(env_var, KEY) };
        let mut config = AppConfig::default();
        config.api.api_key_env = env_var.to_string();

        let manager = Arc::new(JobManager::new(
            temp_store().await,
            Arc::new(StubFactory::new(
                StubSearch::with_content(""),
                StubExtractor::default(),
            )),
        ));
        JobApi::new(config, manager)
    }

    #[tokio::test]
    async fn credentials_are_checked_first() {
        let api = api("CODECHECK_TEST_API_KEY_AUTH").await;

        let err = api
            .create_job(None, "123 Main St, Miami, FL", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CodeCheckError::Unauthorized(_)));

        let err = api.list_jobs(Some("wrong"), None, None).await.unwrap_err();
        assert_eq!(err.to_string(), "unauthorized: Invalid API key");

        // Rejected requests never touched the store
        let page = api.list_jobs(Some(KEY), None, None).await.unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn unconfigured_key_is_a_config_error() {
        let mut config = AppConfig::default();
        config.api.api_key_env = "CODECHECK_TEST_API_KEY_UNSET".into();
        let manager = Arc::new(JobManager::new(
            temp_store().await,
            Arc::new(StubFactory::new(
                StubSearch::with_content(""),
                StubExtractor::default(),
            )),
        ));
        let api = JobApi::new(config, manager);

        let err = api.get_job(Some(KEY), "x").await.unwrap_err();
        assert!(matches!(err, CodeCheckError::Config { .. }));
        assert!(err.to_string().contains("not configured on server"));
    }

    #[tokio::test]
    async fn create_and_fetch() {
        let api = api("CODECHECK_TEST_API_KEY_CREATE").await;
        let job = api
            .create_job(Some(KEY), "  123 Main St, Miami, FL ", Some("openai"))
            .await
            .unwrap();
        assert_eq!(job.address, "123 Main St, Miami, FL");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, "0/13 sections");

        let fetched = api.get_job(Some(KEY), &job.id.to_string()).await.unwrap();
        assert_eq!(fetched, job);

        let results = api
            .get_results(Some(KEY), &job.id.to_string())
            .await
            .unwrap();
        assert!(results.results.is_empty());
        assert_eq!(results.form(), CodeCheckForm::default());

        let err = api
            .create_job(Some(KEY), "123 Main St, Miami, FL", Some("claude"))
            .await
            .unwrap_err();
        assert!(matches!(err, CodeCheckError::Validation { .. }));

        let err = api.get_job(Some(KEY), "not-a-uuid").await.unwrap_err();
        assert!(matches!(err, CodeCheckError::Validation { .. }));
        let err = api
            .get_job(Some(KEY), &JobId::new().to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, CodeCheckError::NotFound(_)));
    }

    #[tokio::test]
    async fn listing_pages_are_disjoint() {
        let api = api("CODECHECK_TEST_API_KEY_LIST").await;
        for i in 1..=5 {
            api.create_job(Some(KEY), &format!("{i} Ocean Dr, Miami Beach, FL"), None)
                .await
                .unwrap();
        }

        let first = api.list_jobs(Some(KEY), Some(3), Some(0)).await.unwrap();
        let second = api.list_jobs(Some(KEY), Some(3), Some(3)).await.unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.jobs.len(), 3);
        assert_eq!(second.jobs.len(), 2);

        let a: HashSet<_> = first.jobs.iter().map(|j| j.id).collect();
        let b: HashSet<_> = second.jobs.iter().map(|j| j.id).collect();
        assert!(a.is_disjoint(&b));
        assert_eq!(a.len() + b.len(), 5);

        let clamped = api.list_jobs(Some(KEY), Some(500), Some(-4)).await.unwrap();
        assert_eq!(clamped.limit, 100);
        assert_eq!(clamped.offset, 0);
        let defaulted = api.list_jobs(Some(KEY), None, None).await.unwrap();
        assert_eq!(defaulted.limit, 50);
        let floor = api.list_jobs(Some(KEY), Some(0), None).await.unwrap();
        assert_eq!(floor.jobs.len(), 1);
    }

    #[tokio::test]
    async fn delete_cancel_retry() {
        let api = api("CODECHECK_TEST_API_KEY_LIFECYCLE").await;
        let job = api
            .create_job(Some(KEY), "123 Main St, Miami, FL", Some("gemini"))
            .await
            .unwrap();
        let id = job.id.to_string();

        // Pending jobs cannot be retried
        assert!(matches!(
            api.retry_job(Some(KEY), &id).await.unwrap_err(),
            CodeCheckError::InvalidTransition { .. }
        ));

        let cancelled = api.cancel_job(Some(KEY), &id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        let requeued = api.retry_job(Some(KEY), &id).await.unwrap();
        assert_eq!(requeued.status, JobStatus::Pending);

        api.delete_job(Some(KEY), &id).await.unwrap();
        assert!(matches!(
            api.delete_job(Some(KEY), &id).await.unwrap_err(),
            CodeCheckError::NotFound(_)
        ));
    }
}
