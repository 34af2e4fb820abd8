//! Error types for pzsvc-exec

use thiserror::Error;

/// Coarse classification of a request failure.
///
/// The HTTP layer maps this onto a status code; the first recorded failure
/// of a request decides the status of its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request (missing command and the like)
    Client,
    /// File operations requested without the capability or a credential
    Forbidden,
    /// Wrong HTTP method on the execute endpoint
    MethodNotAllowed,
    /// A single download/upload/poll failed
    Transfer,
    /// The external program failed to launch or exited non-zero
    Process,
    /// The external store answered with something we could not interpret
    Protocol,
    /// Service-side failure (workspace allocation, local IO)
    Internal,
}

/// Main error type for pzsvc operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Client(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    MethodNotAllowed(String),

    #[error("{0}")]
    Transfer(String),

    #[error("{0}")]
    Process(String),

    #[error("{0}")]
    Protocol(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn client(msg: impl Into<String>) -> Self {
        Error::Client(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Error::Forbidden(msg.into())
    }

    pub fn method_not_allowed(msg: impl Into<String>) -> Self {
        Error::MethodNotAllowed(msg.into())
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Error::Transfer(msg.into())
    }

    pub fn process(msg: impl Into<String>) -> Self {
        Error::Process(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn workspace(msg: impl Into<String>) -> Self {
        Error::Workspace(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Client(_) => ErrorKind::Client,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::MethodNotAllowed(_) => ErrorKind::MethodNotAllowed,
            Error::Transfer(_) => ErrorKind::Transfer,
            Error::Process(_) => ErrorKind::Process,
            Error::Protocol(_) | Error::Serialization(_) => ErrorKind::Protocol,
            Error::Workspace(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }
}
