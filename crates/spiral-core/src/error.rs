//! Error taxonomy (spec §7).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("store not initialized")]
    NotInitialized,

    #[error("capacity exceeded: all spirals full and max_spirals reached")]
    CapacityExceeded,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend operation timed out after {0}ms")]
    BackendTimeout(u64),

    #[error("sigil collision on signature {0}")]
    SigilCollision(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotInitialized => "NotInitialized",
            Error::CapacityExceeded => "CapacityExceeded",
            Error::InvalidInput(_) => "InvalidInput",
            Error::BackendUnavailable(_) => "BackendUnavailable",
            Error::BackendTimeout(_) => "BackendTimeout",
            Error::SigilCollision(_) => "SigilCollision",
            Error::InvariantViolation(_) => "InvariantViolation",
        }
    }
}
