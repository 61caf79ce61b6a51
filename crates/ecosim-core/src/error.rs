//! Error types for the simulation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Rejected configuration. Nothing was changed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No free cell was available for a spawn.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The grid index and the registry disagree. Always an engine bug.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// True for rejected configuration, which callers surface to the user.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
