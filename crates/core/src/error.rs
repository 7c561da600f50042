use std::fmt;
use std::path::PathBuf;

use datachat_index::IndexError;
use thiserror::Error;

/// A table failed the pre-indexing checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    EmptyTable,
    NoColumns,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyTable => f.write_str("table has no rows"),
            ValidationError::NoColumns => f.write_str("table has no columns"),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("spreadsheet error: {0}")]
    Excel(#[from] calamine::Error),
    #[error("workbook has no worksheets: {0:?}")]
    EmptyWorkbook(PathBuf),
    #[error("invalid table: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("unsupported input format: {0:?}")]
    UnsupportedInput(PathBuf),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            CoreError::Validation(errors) => errors,
            _ => &[],
        }
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
