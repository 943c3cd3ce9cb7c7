//! Core domain types for Code Check research jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CodeCheckError, Result};

/// Number of sections researched per address (location + 12 topics).
pub const SECTION_COUNT: usize = 13;

/// Bounds on a submitted address, after trimming.
pub const MIN_ADDRESS_LEN: usize = 5;
pub const MAX_ADDRESS_LEN: usize = 500;

/// Render the progress string stored on a job record, e.g. `"4/13 sections"`.
pub fn progress_label(completed: usize) -> String {
    format!("{completed}/{SECTION_COUNT} sections")
}

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for job identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = CodeCheckError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| CodeCheckError::validation(format!("invalid job id '{s}': {e}")))
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a research job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states never change again except through an explicit retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = CodeCheckError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CodeCheckError::parse(format!("unknown job status '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// LlmProvider
// ---------------------------------------------------------------------------

/// Extraction backend used for a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAi,
    Gemini,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = CodeCheckError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            other => Err(CodeCheckError::validation(format!(
                "unsupported llm_provider '{other}': must be 'openai' or 'gemini'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A persisted research job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub address: String,
    pub llm_provider: LlmProvider,
    pub status: JobStatus,
    /// Human-readable progress, e.g. `"5/13 sections"`.
    pub progress: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// One researched section stored for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionResultRecord {
    pub id: String,
    pub job_id: JobId,
    /// Registry slot name, e.g. `wall_signs`.
    pub section_name: String,
    /// The serialized section document.
    pub section_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Trim and validate an address submitted for research.
pub fn normalize_address(address: &str) -> Result<String> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(CodeCheckError::validation("address cannot be empty"));
    }
    let len = trimmed.chars().count();
    if !(MIN_ADDRESS_LEN..=MAX_ADDRESS_LEN).contains(&len) {
        return Err(CodeCheckError::validation(format!(
            "address must be between {MIN_ADDRESS_LEN} and {MAX_ADDRESS_LEN} characters (got {len})"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrip() {
        let id = JobId::new();
        let s = id.to_string();
        let parsed: JobId = s.parse().expect("parse JobId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn job_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn status_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn provider_parsing() {
        assert_eq!("openai".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAi);
        assert_eq!(" Gemini ".parse::<LlmProvider>().unwrap(), LlmProvider::Gemini);
        let err = "claude".parse::<LlmProvider>().unwrap_err();
        assert!(err.to_string().contains("must be 'openai' or 'gemini'"));
        assert_eq!(LlmProvider::default(), LlmProvider::OpenAi);
    }

    #[test]
    fn progress_label_format() {
        assert_eq!(progress_label(0), "0/13 sections");
        assert_eq!(progress_label(13), "13/13 sections");
    }

    #[test]
    fn address_normalization() {
        assert_eq!(
            normalize_address("  123 Main St, Miami, FL  ").unwrap(),
            "123 Main St, Miami, FL"
        );
        assert!(normalize_address("   ").is_err());
        assert!(normalize_address("1 A").is_err());
        assert!(normalize_address(&"x".repeat(501)).is_err());
    }

    #[test]
    fn job_record_serialization() {
        let record = JobRecord {
            id: JobId::new(),
            address: "123 Main St, Miami, FL".into(),
            llm_provider: LlmProvider::Gemini,
            status: JobStatus::Pending,
            progress: progress_label(0),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
        };

        let json = serde_json::to_string(&record).expect("serialize");
        assert!(json.contains(r#""status":"pending""#));
        assert!(json.contains(r#""llm_provider":"gemini""#));
        assert!(!json.contains("error_message"));
        let parsed: JobRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, record);
    }
}
