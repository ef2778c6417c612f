//! Error types for the aggregation engine and dataset loader.
//!
//! Malformed requests are rejected with typed errors. Sparse or malformed
//! data never produces an error here; it is reported through
//! [`crate::models::Diagnostic`] values attached to results.

use std::path::PathBuf;
use thiserror::Error;

/// Request refers to a field that does not exist or has the wrong kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unknown field '{name}'")]
    UnknownField { name: String },

    #[error("'{name}' is not a categorical dimension and cannot be grouped by")]
    NotADimension { name: String },

    #[error("'{name}' is not a numeric measure")]
    NotNumeric { name: String },

    #[error("normalization field '{name}' is not part of group_by")]
    NotInGroupBy { name: String },

    #[error("dimension '{name}' is not a key column of this result")]
    NotInResult { name: String },

    #[error("key has {found} component(s), expected {expected}")]
    KeyArity { expected: usize, found: usize },
}

/// Errors raised by the aggregation engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("invalid period '{token}' (expected 'month' or 'quarter')")]
    InvalidPeriod { token: String },
}

/// Errors raised while loading a dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("required column '{column}' (header '{header}') not found")]
    MissingColumn { column: String, header: String },

    #[error("dataset has no header row")]
    Empty,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
