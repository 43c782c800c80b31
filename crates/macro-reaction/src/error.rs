//! Error types for the event-reaction pipeline.
//!
//! Only systemic problems are errors. Insufficient data and degenerate fits
//! surface as `None` fields on the output records instead.

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, ReactionError>;

/// Errors that can stop a pipeline run.
#[derive(Debug, Error)]
pub enum ReactionError {
    /// A required input table does not exist
    #[error("Missing required input table `{table}` at {path}")]
    MissingInput {
        /// Logical table name (prices, tickers, events)
        table: String,
        /// Expected location of the table
        path: String,
    },

    /// Missing required column in an input table
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Polars DataFrame error
    #[error("DataFrame error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// CSV reader error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
