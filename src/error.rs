//! Error taxonomy for the ingest and approval pipeline.
//!
//! Pipeline functions return [`anyhow::Result`]; where the failure kind
//! matters to a caller the root cause is an [`IngestError`], recoverable
//! with `err.downcast_ref::<IngestError>()`. Language-model failures are
//! passed through untouched and never wrapped here.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Missing input file, project, run, raw reply, pack, or pipeline.
    #[error("{what} not found: {}", path.display())]
    NotFound { what: String, path: PathBuf },

    #[error("no JSON object found in model output")]
    NoJsonObject,

    #[error("malformed JSON in model output: {0}")]
    MalformedJson(String),

    #[error("extractor output does not match schema: {0}")]
    Schema(String),

    #[error("run directory already exists: {}", .0.display())]
    RunExists(PathBuf),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl IngestError {
    pub fn not_found(what: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        IngestError::NotFound {
            what: what.into(),
            path: path.into(),
        }
    }

    /// True for the parse/validation family that leaves a `parse_errors.txt` trail.
    pub fn is_parse_failure(&self) -> bool {
        matches!(
            self,
            IngestError::NoJsonObject | IngestError::MalformedJson(_) | IngestError::Schema(_)
        )
    }
}
