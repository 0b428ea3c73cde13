//! bibchex-engine: validation and enrichment of bibliographic entries
//!
//! Two concurrent subsystems share this crate:
//! - Retrieval: per-source rate-limited fan-out of metadata queries
//!   ([`orchestrator`], [`sources`], [`rate_limit`])
//! - Consistency checks: reset, per-entry evaluation, then document-wide
//!   reduction ([`checks`], [`engine`], [`partition`], [`worker_pool`])
//!
//! [`pipeline::Checker`] ties both together into one run.

pub mod checks;
pub mod engine;
pub mod error;
pub mod options;
pub mod orchestrator;
pub mod partition;
pub mod pipeline;
pub mod progress;
pub mod rate_limit;
pub mod similarity;
pub mod sources;
pub mod types;
pub mod worker_pool;

pub use error::{CheckError, RetrievalError};
pub use types::{Entry, Finding, Person, Problem, Suggestion};
