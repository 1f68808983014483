use thiserror::Error;

use crate::model::election::ElectionStatus;

/// Errors produced by bulletin board operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ElectionStatus,
        to: ElectionStatus,
    },
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Invalid ballot proof")]
    InvalidProof,
    #[error("Already voted in this election")]
    DuplicateVote,
    #[error("Access token has expired")]
    ExpiredToken,
    #[error("Invalid access token")]
    InvalidToken,
    #[error("Insufficient key shares: need {needed}, got {found} valid")]
    InsufficientShares { needed: usize, found: usize },
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Storage failure: {0}")]
    Storage(String),
    #[error("Duplicate key in {table}: {key}")]
    DuplicateKey { table: &'static str, key: String },
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_state(what: impl Into<String>) -> Self {
        Self::InvalidState(what.into())
    }

    pub fn validation(what: impl Into<String>) -> Self {
        Self::Validation(what.into())
    }

    /// Return true if this is a unique index violation.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    /// True if the caller supplied bad input, as opposed to the board failing.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::DuplicateKey { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("JSON: {err}"))
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Self::Storage(format!("CSV: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
