//
// error.rs
// Dicom-Volume-Tools-rs
//
// Typed errors raised by the conversion core: foreign inputs, attribute conflicts, geometry and container failures.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::PathBuf;

use thiserror::Error;

/// Result type of the conversion core.
pub type Result<T> = std::result::Result<T, ToolError>;

#[derive(Debug, Error)]
pub enum ToolError {
    /// A file in a series directory is not a usable slice of that series.
    #[error("foreign file {path:?}: {reason}")]
    ForeignFile { path: PathBuf, reason: String },

    /// The same element was given twice (keyword and tag form) with different values.
    #[error("conflicting values for attribute {key}: {first:?} vs {second:?}")]
    ConflictingAttribute {
        key: String,
        first: String,
        second: String,
    },

    #[error("unknown attribute key: {0}")]
    UnknownAttribute(String),

    #[error("invalid value for attribute {key}: {reason}")]
    InvalidAttributeValue { key: String, reason: String },

    #[error("geometry error: {0}")]
    Geometry(String),

    #[error(
        "ambiguous slice ordering: {first:?} and {second:?} share position {position:.4}"
    )]
    AmbiguousOrdering {
        first: PathBuf,
        second: PathBuf,
        position: f64,
    },

    #[error("volume codec error: {0}")]
    Codec(String),

    #[error("header store error: {0}")]
    HeaderStore(String),

    #[error("no DICOM slices found in {0:?}")]
    EmptySeries(PathBuf),

    #[error("output already exists: {0:?} (use --force to replace it)")]
    OutputExists(PathBuf),

    #[error("invalid file name pattern {0}")]
    InvalidPattern(String),

    #[error("list file error: {0}")]
    ListFile(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("DICOM error: {0}")]
    Dicom(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    pub(crate) fn foreign(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ToolError::ForeignFile {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<dicom_object::ReadError> for ToolError {
    fn from(e: dicom_object::ReadError) -> Self {
        ToolError::Dicom(e.to_string())
    }
}

impl From<dicom_object::WriteError> for ToolError {
    fn from(e: dicom_object::WriteError) -> Self {
        ToolError::Dicom(e.to_string())
    }
}
