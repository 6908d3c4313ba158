//! Error types for the orchestration core.

use thiserror::Error;

use crate::catalog::ActivityKey;
use crate::shape::ShapeTag;
use crate::validate::ValidationReport;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Definition-level errors: catalog, transform and pipeline bookkeeping.
///
/// Failures of individual activity invocations are [`ActivityError`]s and are
/// folded into a failed `PipelineRun` rather than surfaced here.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An activity with the same `(service, name)` is already registered.
    #[error("Duplicate activity: {0}")]
    DuplicateActivity(ActivityKey),

    /// No activity registered under the given key or name.
    #[error("Unknown activity: {0}")]
    UnknownActivity(String),

    /// A bare activity name is declared by more than one service.
    #[error("Activity '{name}' is declared by several services: {}", services.join(", "))]
    AmbiguousActivity { name: String, services: Vec<String> },

    /// No transform registered under the given name.
    #[error("Unknown transform: {0}")]
    UnknownTransform(String),

    /// A transform with the same name is already registered.
    #[error("Duplicate transform: {0}")]
    DuplicateTransform(String),

    /// Several transforms could bridge the pair; an explicit name is required.
    #[error(
        "Ambiguous transform from '{from}' to '{to}': candidates {}",
        candidates.join(", ")
    )]
    AmbiguousTransform {
        from: ShapeTag,
        to: ShapeTag,
        candidates: Vec<String>,
    },

    /// A step cannot accept the output of its predecessor.
    #[error("Step {step_index} is incompatible: {message}")]
    IncompatibleStep { step_index: usize, message: String },

    /// No pipeline registered under the given name.
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    /// A pipeline with the same name is already registered.
    #[error("Duplicate pipeline: {0}")]
    DuplicatePipeline(String),

    /// Pre-flight validation rejected the pipeline before any step ran.
    #[error("Invalid pipeline '{}': {}", .0.pipeline, .0.summary())]
    InvalidPipeline(Box<ValidationReport>),

    /// A transform could not reshape the payload it was given.
    #[error("Transform '{name}' failed: {message}")]
    TransformFailed { name: String, message: String },

    /// The run store rejected a write.
    #[error("Run store error: {0}")]
    RunStore(String),

    /// The declarative services file is structurally wrong.
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    /// Failed to read a definition file.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse a YAML definition file.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Failure of a single activity invocation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActivityError {
    /// A failure that may succeed on another attempt (worker hiccup, dropped reply).
    #[error("transient failure: {0}")]
    Transient(String),

    /// A failure that will not go away by retrying (malformed payload, rejected input).
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The attempt did not finish within the activity's timeout.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl ActivityError {
    /// Whether the retry policy may re-attempt after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ActivityError::Permanent(_))
    }
}
