//! Shared types, error model, and configuration for Code Check.
//!
//! This crate is the foundation depended on by all other Code Check crates.
//! It provides:
//! - [`CodeCheckError`]: the unified error type
//! - Job domain types ([`JobId`], [`JobStatus`], [`LlmProvider`], [`JobRecord`])
//! - Configuration ([`AppConfig`], config loading, credential checks)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    ApiConfig, AppConfig, DefaultsConfig, GeminiConfig, OpenAiConfig, PerplexityConfig,
    WorkerConfig, config_dir, config_file_path, expand_home, init_config, load_config,
    load_config_from, resolve_secret, secret_present, validate_api_key, validate_config,
};
pub use error::{CodeCheckError, Result};
pub use types::{
    JobId, JobRecord, JobStatus, LlmProvider, MAX_ADDRESS_LEN, MIN_ADDRESS_LEN, SECTION_COUNT,
    SectionResultRecord, normalize_address, progress_label,
};
