//! Research pipeline and job lifecycle for Code Check.
//!
//! This crate ties the search and extraction backends to the 13-section
//! sign-code form: each address is researched section by section
//! ([`pipeline::run`]), optionally as a persisted job that a [`Worker`]
//! drives through its lifecycle ([`JobManager`]).

pub mod citations;
pub mod export;
pub mod jobs;
pub mod pipeline;
pub mod provenance;
pub mod research;
pub mod sections;
pub mod service;
pub mod worker;

#[cfg(test)]
mod testing;

pub use citations::CitationIndex;
pub use export::{ExportRow, flatten_form, to_tsv};
pub use jobs::{AgentFactory, ConfigAgentFactory, JobManager, JobOutcome};
pub use pipeline::{NoopSink, SectionSink};
pub use provenance::ResearchedField;
pub use research::ResearchAgent;
pub use sections::{CodeCheckForm, Section, SectionDocument, SectionSlot};
pub use service::{JobApi, JobPage, JobResults};
pub use worker::Worker;
