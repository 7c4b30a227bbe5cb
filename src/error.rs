use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the library. Numeric degeneracies inside continuum
/// normalization never reach this type; they are masked in place.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing path, wrong file type, or anything else wrong with the input
    /// before any parsing happens.
    #[error("input error: {0}")]
    Input(String),

    #[error("failed to load {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    /// The file parsed but its numbers cannot produce a usable spectrum.
    #[error("degenerate data in {path}: {reason}")]
    Data { path: PathBuf, reason: String },

    #[error("no usable alignment line for target '{target}' (checked {lines_checked} lines)")]
    AlignmentDegeneracy { target: String, lines_checked: usize },

    #[error("model fit failed: {0}")]
    Fit(String),

    #[error("label inference failed: {0}")]
    Infer(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("operation requires a unified wavelength grid")]
    GridNotUnified,

    #[error("dataset is empty")]
    EmptyDataset,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),
}

pub type Result<T> = std::result::Result<T, Error>;
