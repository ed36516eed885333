//! Core error type for the Antfarm kernel.
//!
//! One variant per error kind; every variant carries a human-readable
//! message and maps to a distinct stable code via [`CoreError::code`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl CoreError {
    /// Stable machine-readable code for the CLI and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::Parse(_) => "PARSE_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Store(_) => "STORE_ERROR",
            Self::Gateway(_) => "GATEWAY_ERROR",
            Self::Io(_) => "IO_FAILURE",
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
