//! SQL migration definitions for the Code Check job database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: jobs, section_results",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Research jobs
CREATE TABLE IF NOT EXISTS jobs (
    id            TEXT PRIMARY KEY,
    address       TEXT NOT NULL,
    llm_provider  TEXT NOT NULL,
    status        TEXT NOT NULL
                  CHECK (status IN ('pending', 'processing', 'completed', 'failed', 'cancelled')),
    progress      TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    started_at    TEXT,
    completed_at  TEXT,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);

-- One row per researched section
CREATE TABLE IF NOT EXISTS section_results (
    id           TEXT PRIMARY KEY,
    job_id       TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    section_name TEXT NOT NULL,
    section_data TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_section_results_job_id ON section_results(job_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
