// External crates
use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the grid load pipeline
#[derive(Debug, Error)]
pub enum GridError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Column '{0}' not found")]
    MissingColumn(String),

    #[error("Invalid timestamp '{value}' for format '{format}'")]
    Timestamp { value: String, format: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No sliding windows were generated; cannot build a dataset")]
    EmptyDataset,

    #[error("Length mismatch: {expected} targets vs {actual} predictions")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Tensor data conversion failed: {0}")]
    TensorData(String),

    #[error("Model record error: {0}")]
    Record(String),

    #[error("Exported model diverges from traced output by {deviation:e} (tolerance {tolerance:e})")]
    ExportMismatch { deviation: f64, tolerance: f64 },
}

pub type GridResult<T> = Result<T, GridError>;
