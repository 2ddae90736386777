use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported file type for '{0}'")]
    Unsupported(String),
    #[error("'{0}' has no header row")]
    MissingHeader(String),
    #[error("failed to read spreadsheet: {0}")]
    Spreadsheet(String),
    #[error("malformed delimited text: {0}")]
    Delimited(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid SQL identifier '{0}'")]
    InvalidIdentifier(String),
    #[error("table '{0}' does not exist")]
    MissingTable(String),
    #[error("insert into '{0}' did not yield a generated id")]
    MissingGeneratedId(String),
    #[error("failed to open store: {0}")]
    Open(String),
}

/// Failure of a single row. The row is skipped and recorded; the batch goes on.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("association failed: {0}")]
    Association(String),
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("import job '{0}' not found")]
    NotFound(String),
    #[error("import job '{0}' already finished")]
    Terminal(String),
    #[error("job store lock poisoned")]
    Poisoned,
}

/// Job-level failure: the job ends in the `failed` stage.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("failed to start import worker: {0}")]
    Worker(#[from] std::io::Error),
}

/// Non-fatal findings reported alongside the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    Classification { row: usize },
    Resolution { row: usize, message: String },
    Fallback { row: usize, message: String },
    Validation { row: usize, message: String },
    Schema { message: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Classification { row } => {
                write!(f, "row {row}: record type could not be determined, skipped")
            }
            Warning::Resolution { row, message }
            | Warning::Fallback { row, message }
            | Warning::Validation { row, message } => write!(f, "row {row}: {message}"),
            Warning::Schema { message } => write!(f, "{message}"),
        }
    }
}
