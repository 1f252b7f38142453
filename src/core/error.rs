use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Statement error at line {line}: {message}")]
    Statement { line: usize, message: String },

    #[error("Decode error at offset {offset}: {message}")]
    Decode { offset: usize, message: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Execution time limit of {0}s exceeded")]
    TimeLimitExceeded(u64),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Fatal errors abort the running operation; the rest are collected
    /// into a report and the operation carries on.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Statement { .. } | Self::Decode { .. } | Self::Schema(_)
        )
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Self::Validation(format!("Invalid replacement CSV: {}", err))
    }
}
