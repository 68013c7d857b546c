use std::fmt;

/// Crate-wide error type for everything the core pipeline can fail on.
#[derive(Debug)]
pub enum FuzzError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Http(reqwest::Error),
    Csv(csv::Error),
    InvalidInput(String),
    CompileFailed(String),
    ProcessError(String),
    Timeout(String),
}

impl fmt::Display for FuzzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuzzError::Io(e) => write!(f, "I/O error: {e}"),
            FuzzError::Json(e) => write!(f, "JSON error: {e}"),
            FuzzError::Http(e) => write!(f, "HTTP error: {e}"),
            FuzzError::Csv(e) => write!(f, "CSV error: {e}"),
            FuzzError::InvalidInput(msg) => write!(f, "Invalid input: {msg}"),
            FuzzError::CompileFailed(msg) => write!(f, "Compile failed: {msg}"),
            FuzzError::ProcessError(msg) => write!(f, "Process error: {msg}"),
            FuzzError::Timeout(msg) => write!(f, "Timeout: {msg}"),
        }
    }
}

impl std::error::Error for FuzzError {}

impl From<std::io::Error> for FuzzError {
    fn from(e: std::io::Error) -> Self {
        FuzzError::Io(e)
    }
}

impl From<serde_json::Error> for FuzzError {
    fn from(e: serde_json::Error) -> Self {
        FuzzError::Json(e)
    }
}

impl From<reqwest::Error> for FuzzError {
    fn from(e: reqwest::Error) -> Self {
        FuzzError::Http(e)
    }
}

impl From<csv::Error> for FuzzError {
    fn from(e: csv::Error) -> Self {
        FuzzError::Csv(e)
    }
}

pub type Result<T> = std::result::Result<T, FuzzError>;
