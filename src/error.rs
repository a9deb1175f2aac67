//! Error types

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for producer, URL resolution and wire operations
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed configuration
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown connection URL option, or a known option with an unsupported value
    #[error("unsupported connection URL option: {key}={value}")]
    UnsupportedOption {
        /// Query parameter name
        key: String,
        /// Query parameter value
        value: String,
    },

    /// Malformed integer, boolean, URL or certificate material
    #[error("parse error: {0}")]
    Parse(String),

    /// Connection requested before a successful initialize
    #[error("connection producer has not been initialized")]
    NotInitialized,

    /// Failure while establishing or verifying connectivity
    #[error("{context}: {source}")]
    Connectivity {
        /// What was being attempted
        context: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// TLS setup or handshake failure
    #[error("tls error: {0}")]
    Tls(String),

    /// Malformed or unexpected wire message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Server answered a command with `ok: 0`
    #[error("server error {code}: {message}")]
    Server {
        /// Server error code
        code: i32,
        /// Server error message
        message: String,
    },

    /// Operation did not complete in time
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
        /// Configured limit
        after: Duration,
    },

    /// Peer closed the connection
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation attempted in the wrong connection or handle state
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },
}

/// Coarse error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration validation failure
    Validation,
    /// Unsupported URL option
    UnsupportedOption,
    /// Malformed value or material
    Parse,
    /// Producer not initialized
    NotInitialized,
    /// Dial, TLS handshake, authentication or probe failure
    Connectivity,
}

impl Error {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::UnsupportedOption { .. } => ErrorKind::UnsupportedOption,
            Error::Parse(_) => ErrorKind::Parse,
            Error::NotInitialized => ErrorKind::NotInitialized,
            Error::Connectivity { .. }
            | Error::Io(_)
            | Error::Tls(_)
            | Error::Protocol(_)
            | Error::Authentication(_)
            | Error::Server { .. }
            | Error::Timeout { .. }
            | Error::ConnectionClosed
            | Error::InvalidState { .. } => ErrorKind::Connectivity,
        }
    }

    /// Whether this error is a connectivity failure
    pub fn is_connectivity(&self) -> bool {
        self.kind() == ErrorKind::Connectivity
    }

    /// Wrap an error with connectivity context
    pub fn connectivity(context: impl Into<String>, source: Error) -> Self {
        Error::Connectivity {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl From<crate::auth::ScramError> for Error {
    fn from(err: crate::auth::ScramError) -> Self {
        Error::Authentication(format!("SCRAM error: {}", err))
    }
}

impl From<bson::de::Error> for Error {
    fn from(err: bson::de::Error) -> Self {
        Error::Protocol(format!("invalid BSON document: {}", err))
    }
}

impl From<bson::ser::Error> for Error {
    fn from(err: bson::ser::Error) -> Self {
        Error::Protocol(format!("cannot encode BSON document: {}", err))
    }
}
