//! Error types for nickreg
//!
//! Registry operations themselves are infallible; these variants cover the
//! boundary (policy, configuration, message decoding).

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for nickreg
#[derive(Error, Debug)]
pub enum Error {
    // Policy errors
    #[error("Registration is restricted to services")]
    ServicesOnly,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("You can only register your own nick")]
    NotOwnNick,

    #[error("You can only register to your own account")]
    NotOwnAccount,

    #[error("You are not logged in to an account")]
    NotLoggedIn,

    #[error("You can only register {max} nicks")]
    QuotaExceeded { max: usize },

    #[error("Not a valid nick: {0}")]
    InvalidNick(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl Error {
    /// Whether this error is a policy refusal (reported back to the requester)
    /// rather than an operational failure.
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            Error::ServicesOnly
                | Error::PermissionDenied(_)
                | Error::NotOwnNick
                | Error::NotOwnAccount
                | Error::NotLoggedIn
                | Error::QuotaExceeded { .. }
                | Error::InvalidNick(_)
                | Error::InvalidRequest(_)
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
