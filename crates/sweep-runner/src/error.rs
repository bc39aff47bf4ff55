use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a sweep operation.
///
/// Per-file parse problems are not represented here; they are collected as
/// [`crate::parse::ParseFailure`] records instead.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("experiment configuration malformed: {0}")]
    Validation(String),

    #[error("cannot resolve epoch reference '{0}'")]
    UnresolvableReference(String),

    #[error("symbolic epoch {reference} goes past current set of epochs (offset {offset}, {available} available)")]
    OutOfRangeReference {
        reference: String,
        offset: usize,
        available: usize,
    },

    #[error("no epochs exist yet")]
    EmptyEpochSet,

    #[error("epoch {0} already exists")]
    EpochExists(String),

    #[error("queue information ill-specified for processor count of {p}")]
    QueueUnspecified { p: u64 },

    #[error("invalid filter expression: {0}")]
    InvalidFilterExpression(String),

    #[error("column {0} does not appear in results")]
    UnknownColumn(String),

    #[error("cannot find extractor '{0}' among built-ins or user definitions")]
    UnknownExtractor(String),

    #[error("unknown machine '{0}'")]
    UnknownMachine(String),

    #[error("submission failed: {0}")]
    Submission(String),

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SweepResult<T> = Result<T, SweepError>;

/// Coarse grouping used to pick a process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Query,
    Io,
    External,
}

impl ErrorCategory {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorCategory::Validation => 2,
            ErrorCategory::NotFound => 3,
            ErrorCategory::Query => 4,
            ErrorCategory::Io => 5,
            ErrorCategory::External => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Query => "query",
            ErrorCategory::Io => "io",
            ErrorCategory::External => "external",
        }
    }
}

impl SweepError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SweepError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            SweepError::Validation(_)
            | SweepError::QueueUnspecified { .. }
            | SweepError::EpochExists(_)
            | SweepError::Yaml(_) => ErrorCategory::Validation,
            SweepError::UnresolvableReference(_)
            | SweepError::OutOfRangeReference { .. }
            | SweepError::EmptyEpochSet
            | SweepError::UnknownExtractor(_)
            | SweepError::UnknownMachine(_) => ErrorCategory::NotFound,
            SweepError::InvalidFilterExpression(_) | SweepError::UnknownColumn(_) => {
                ErrorCategory::Query
            }
            SweepError::Io { .. } | SweepError::Json(_) => ErrorCategory::Io,
            SweepError::Submission(_) => ErrorCategory::External,
        }
    }

    /// Stable snake_case code for machine-readable output.
    pub fn code(&self) -> &'static str {
        match self {
            SweepError::Validation(_) => "validation_error",
            SweepError::UnresolvableReference(_) => "unresolvable_reference",
            SweepError::OutOfRangeReference { .. } => "out_of_range_reference",
            SweepError::EmptyEpochSet => "empty_epoch_set",
            SweepError::EpochExists(_) => "epoch_exists",
            SweepError::QueueUnspecified { .. } => "queue_unspecified",
            SweepError::InvalidFilterExpression(_) => "invalid_filter_expression",
            SweepError::UnknownColumn(_) => "unknown_column",
            SweepError::UnknownExtractor(_) => "unknown_extractor",
            SweepError::UnknownMachine(_) => "unknown_machine",
            SweepError::Submission(_) => "submission_failed",
            SweepError::Io { .. } => "io_error",
            SweepError::Yaml(_) => "yaml_error",
            SweepError::Json(_) => "json_error",
        }
    }
}
