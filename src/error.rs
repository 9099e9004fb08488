//! Pipeline error taxonomy.
//!
//! Infrastructure code (HTTP providers, the SQLite store, config loading)
//! returns `anyhow::Result`. Agents translate those failures into a
//! [`PipelineError`] at the stage boundary so callers can tell a fatal
//! ingestion problem from a degraded dependency.

use thiserror::Error;

use crate::models::Stage;

/// Errors raised while processing a single request.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The source could not be read, fetched, parsed or transcribed.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// The LLM call failed or kept violating the output schema.
    #[error("analysis failed after {attempts} attempt(s): {message}")]
    Analysis { attempts: u32, message: String },

    /// Duplicate search was unavailable. Recorded as a warning, never fatal.
    #[error("duplicate detection unavailable: {0}")]
    QualityServiceDegraded(String),

    /// A write to the knowledge base (or the embedding it needs) failed.
    #[error("persistence failed during {stage} (record: {}): {message}", .record_id.as_deref().unwrap_or("new"))]
    Persistence {
        stage: Stage,
        record_id: Option<String>,
        message: String,
    },

    /// A stage exceeded the configured per-stage timeout.
    #[error("{stage} stage timed out after {seconds}s")]
    StageTimeout { stage: Stage, seconds: u64 },

    /// The request itself is malformed (e.g. out-of-range priority override).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Failure of one item inside a batch; siblings are unaffected.
    #[error("batch item {index}: {source}")]
    BatchItem {
        index: usize,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Whether this error ends the request's workflow.
    pub fn is_fatal(&self) -> bool {
        match self {
            PipelineError::QualityServiceDegraded(_) => false,
            PipelineError::BatchItem { source, .. } => source.is_fatal(),
            _ => true,
        }
    }

    /// Short machine-readable kind, used in responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Extraction(_) => "extraction_error",
            PipelineError::Analysis { .. } => "analysis_error",
            PipelineError::QualityServiceDegraded(_) => "quality_service_degraded",
            PipelineError::Persistence { .. } => "persistence_error",
            PipelineError::StageTimeout { .. } => "stage_timeout",
            PipelineError::InvalidRequest(_) => "invalid_request",
            PipelineError::BatchItem { .. } => "batch_item_error",
        }
    }

    /// Wrap this error as the failure of batch item `index`.
    pub fn in_batch(self, index: usize) -> Self {
        PipelineError::BatchItem {
            index,
            source: Box::new(self),
        }
    }

    pub(crate) fn persistence(
        stage: Stage,
        record_id: Option<&str>,
        err: impl std::fmt::Display,
    ) -> Self {
        PipelineError::Persistence {
            stage,
            record_id: record_id.map(str::to_string),
            message: err.to_string(),
        }
    }
}
