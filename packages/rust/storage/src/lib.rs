//! libSQL storage layer for research jobs and their section results.
//!
//! The [`JobStore`] struct wraps a libSQL database holding the `jobs` and
//! `section_results` tables. Section results belong to exactly one job and
//! are removed with it.
//!
//! **State writes:** every status change is a conditional `UPDATE` keyed on
//! the current status, so a transition either applies atomically or reports
//! [`CodeCheckError::InvalidTransition`]. Two workers cannot both claim the
//! same pending job. Section results are only appended to `processing` jobs.

mod migrations;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use codecheck_shared::{
    CodeCheckError, JobId, JobRecord, JobStatus, LlmProvider, Result, SectionResultRecord,
    progress_label,
};
use libsql::{Connection, Database, params};
use uuid::Uuid;

/// Columns selected for a [`JobRecord`], in `row_to_job` order.
const JOB_COLUMNS: &str =
    "id, address, llm_provider, status, progress, created_at, started_at, completed_at, error_message";

/// Primary storage handle wrapping a libSQL database.
pub struct JobStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl JobStore {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| CodeCheckError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .await
            .map_err(storage_err)?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    CodeCheckError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Job operations
    // -----------------------------------------------------------------------

    /// Insert a new job in `pending` state with `0/13 sections` progress.
    pub async fn create_job(&self, address: &str, llm_provider: LlmProvider) -> Result<JobRecord> {
        let record = JobRecord {
            id: JobId::new(),
            address: address.to_string(),
            llm_provider,
            status: JobStatus::Pending,
            progress: progress_label(0),
            created_at: current_time(),
            started_at: None,
            completed_at: None,
            error_message: None,
        };

        self.conn
            .execute(
                "INSERT INTO jobs (id, address, llm_provider, status, progress, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id.to_string(),
                    record.address.as_str(),
                    record.llm_provider.as_str(),
                    record.status.as_str(),
                    record.progress.as_str(),
                    timestamp(&record.created_at),
                ],
            )
            .await
            .map_err(storage_err)?;

        tracing::debug!(job_id = %record.id, address, "job created");
        Ok(record)
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: &JobId) -> Result<Option<JobRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Get a job by ID, failing with [`CodeCheckError::NotFound`] when missing.
    pub async fn require_job(&self, id: &JobId) -> Result<JobRecord> {
        self.get_job(id)
            .await?
            .ok_or_else(|| CodeCheckError::NotFound(format!("job {id}")))
    }

    /// List jobs newest first.
    pub async fn list_jobs(&self, limit: u32, offset: u32) -> Result<Vec<JobRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT ?1 OFFSET ?2"
                ),
                params![limit, offset],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_job(&row)?);
        }
        Ok(results)
    }

    /// Total number of jobs.
    pub async fn count_jobs(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM jobs", params![])
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<u64>(0).map_err(storage_err)?),
            Ok(None) => Ok(0),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Oldest job still waiting for a worker.
    pub async fn next_pending_job(&self) -> Result<Option<JobRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE status = 'pending'
                     ORDER BY created_at ASC, rowid ASC
                     LIMIT 1"
                ),
                params![],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Delete a job and all of its section results. Returns `false` if the job did not exist.
    pub async fn delete_job(&self, id: &JobId) -> Result<bool> {
        let id = id.to_string();
        // Explicit so deletion does not depend on the foreign_keys pragma.
        self.conn
            .execute(
                "DELETE FROM section_results WHERE job_id = ?1",
                params![id.as_str()],
            )
            .await
            .map_err(storage_err)?;

        let deleted = self
            .conn
            .execute("DELETE FROM jobs WHERE id = ?1", params![id.as_str()])
            .await
            .map_err(storage_err)?;
        Ok(deleted > 0)
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    /// `pending → processing`. Records `started_at` and resets progress.
    pub async fn claim_job(&self, id: &JobId) -> Result<JobRecord> {
        let now = timestamp(&current_time());
        let changed = self
            .conn
            .execute(
                "UPDATE jobs
                 SET status = 'processing', started_at = ?1, progress = ?2,
                     completed_at = NULL, error_message = NULL
                 WHERE id = ?3 AND status = 'pending'",
                params![now.as_str(), progress_label(0), id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        self.after_transition(id, changed, "claim", JobStatus::Pending)
            .await
    }

    /// Write progress for a job that is still `processing`.
    pub async fn update_progress(&self, id: &JobId, progress: &str) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET progress = ?1 WHERE id = ?2 AND status = 'processing'",
                params![progress, id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        self.after_transition(id, changed, "update progress of", JobStatus::Processing)
            .await
            .map(|_| ())
    }

    /// `processing → completed`.
    pub async fn complete_job(&self, id: &JobId, progress: &str) -> Result<JobRecord> {
        let now = timestamp(&current_time());
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET status = 'completed', completed_at = ?1, progress = ?2
                 WHERE id = ?3 AND status = 'processing'",
                params![now.as_str(), progress, id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        self.after_transition(id, changed, "complete", JobStatus::Processing)
            .await
    }

    /// `processing → failed`, recording the error message.
    pub async fn fail_job(&self, id: &JobId, error_message: &str) -> Result<JobRecord> {
        let now = timestamp(&current_time());
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET status = 'failed', completed_at = ?1, error_message = ?2
                 WHERE id = ?3 AND status = 'processing'",
                params![now.as_str(), error_message, id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        self.after_transition(id, changed, "fail", JobStatus::Processing)
            .await
    }

    /// External cancellation: `pending | processing → cancelled`.
    pub async fn cancel_job(&self, id: &JobId) -> Result<JobRecord> {
        let now = timestamp(&current_time());
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET status = 'cancelled', completed_at = ?1
                 WHERE id = ?2 AND status IN ('pending', 'processing')",
                params![now.as_str(), id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        if changed == 0 {
            let job = self.require_job(id).await?;
            return Err(CodeCheckError::transition(
                id,
                format!("cannot cancel a job that is already {}", job.status),
            ));
        }
        self.require_job(id).await
    }

    /// Terminal → `pending`, clearing previous section results and progress.
    pub async fn requeue_job(&self, id: &JobId) -> Result<JobRecord> {
        let changed = self
            .conn
            .execute(
                "UPDATE jobs
                 SET status = 'pending', progress = ?1, started_at = NULL,
                     completed_at = NULL, error_message = NULL
                 WHERE id = ?2 AND status IN ('completed', 'failed', 'cancelled')",
                params![progress_label(0), id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        if changed == 0 {
            let job = self.require_job(id).await?;
            return Err(CodeCheckError::transition(
                id,
                format!("only finished jobs can be retried (job is {})", job.status),
            ));
        }

        let cleared = self
            .conn
            .execute(
                "DELETE FROM section_results WHERE job_id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;
        tracing::info!(job_id = %id, cleared, "job requeued");

        self.require_job(id).await
    }

    /// Fail every `processing` job whose `started_at` is before `cutoff`.
    /// Returns the number of jobs swept.
    pub async fn fail_stale_jobs(&self, cutoff: DateTime<Utc>, error_message: &str) -> Result<u64> {
        let now = timestamp(&current_time());
        self.conn
            .execute(
                "UPDATE jobs SET status = 'failed', completed_at = ?1, error_message = ?2
                 WHERE status = 'processing' AND started_at IS NOT NULL AND started_at < ?3",
                params![now.as_str(), error_message, timestamp(&cutoff)],
            )
            .await
            .map_err(storage_err)
    }

    /// Turn a zero-row conditional update into the right error.
    async fn after_transition(
        &self,
        id: &JobId,
        changed: u64,
        action: &str,
        required: JobStatus,
    ) -> Result<JobRecord> {
        let job = self.require_job(id).await?;
        if changed == 0 {
            return Err(CodeCheckError::transition(
                id,
                format!("cannot {action} job: status is {}, expected {required}", job.status),
            ));
        }
        Ok(job)
    }

    // -----------------------------------------------------------------------
    // Section result operations
    // -----------------------------------------------------------------------

    /// Append one section result to a job that is still `processing`.
    pub async fn save_section_result(
        &self,
        job_id: &JobId,
        section_name: &str,
        section_data: &serde_json::Value,
    ) -> Result<SectionResultRecord> {
        let record = SectionResultRecord {
            id: Uuid::now_v7().to_string(),
            job_id: *job_id,
            section_name: section_name.to_string(),
            section_data: section_data.clone(),
            created_at: current_time(),
        };
        let data = serde_json::to_string(section_data)
            .map_err(|e| CodeCheckError::Storage(format!("serialize section data: {e}")))?;

        let inserted = self
            .conn
            .execute(
                "INSERT INTO section_results (id, job_id, section_name, section_data, created_at)
                 SELECT ?1, ?2, ?3, ?4, ?5
                 WHERE EXISTS (SELECT 1 FROM jobs WHERE id = ?2 AND status = 'processing')",
                params![
                    record.id.as_str(),
                    job_id.to_string(),
                    section_name,
                    data,
                    timestamp(&record.created_at),
                ],
            )
            .await
            .map_err(storage_err)?;

        self.after_transition(job_id, inserted, "save a section for", JobStatus::Processing)
            .await?;
        Ok(record)
    }

    /// All section results for a job, in the order they were written.
    pub async fn get_job_results(&self, job_id: &JobId) -> Result<Vec<SectionResultRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, job_id, section_name, section_data, created_at
                 FROM section_results WHERE job_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
                params![job_id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_section_result(&row)?);
        }
        Ok(results)
    }
}

fn storage_err(e: libsql::Error) -> CodeCheckError {
    CodeCheckError::Storage(e.to_string())
}

/// Current time at the precision timestamps are stored with.
fn current_time() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CodeCheckError::Storage(format!("invalid date '{s}': {e}")))
}

fn optional_timestamp(row: &libsql::Row, idx: i32) -> Result<Option<DateTime<Utc>>> {
    match row.get::<String>(idx).ok() {
        Some(s) => Ok(Some(parse_timestamp(&s)?)),
        None => Ok(None),
    }
}

/// Convert a database row to a [`JobRecord`].
fn row_to_job(row: &libsql::Row) -> Result<JobRecord> {
    let id: String = row.get(0).map_err(storage_err)?;
    let provider: String = row.get(2).map_err(storage_err)?;
    let status: String = row.get(3).map_err(storage_err)?;
    let created_at: String = row.get(5).map_err(storage_err)?;

    Ok(JobRecord {
        id: id.parse()?,
        address: row.get::<String>(1).map_err(storage_err)?,
        llm_provider: provider.parse()?,
        status: status.parse()?,
        progress: row.get::<String>(4).map_err(storage_err)?,
        created_at: parse_timestamp(&created_at)?,
        started_at: optional_timestamp(row, 6)?,
        completed_at: optional_timestamp(row, 7)?,
        error_message: row.get::<String>(8).ok(),
    })
}

/// Convert a database row to a [`SectionResultRecord`].
fn row_to_section_result(row: &libsql::Row) -> Result<SectionResultRecord> {
    let job_id: String = row.get(1).map_err(storage_err)?;
    let data: String = row.get(3).map_err(storage_err)?;
    let created_at: String = row.get(4).map_err(storage_err)?;

    Ok(SectionResultRecord {
        id: row.get::<String>(0).map_err(storage_err)?,
        job_id: job_id.parse()?,
        section_name: row.get::<String>(2).map_err(storage_err)?,
        section_data: serde_json::from_str(&data)
            .map_err(|e| CodeCheckError::Storage(format!("corrupt section data: {e}")))?,
        created_at: parse_timestamp(&created_at)?,
    })
}
