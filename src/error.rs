//! Error types

use std::io;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while establishing or managing a backend connection
#[derive(Debug, Error)]
pub enum Error {
    /// The connection could not be established.
    ///
    /// This is the only failure kind that crosses a policy's `start` or
    /// `complete` hook. The message is taken from the underlying failure
    /// (unreachable host, rejected credentials, bad options, ...).
    #[error("could not connect to server: {0}")]
    ConnectFailure(String),

    /// Malformed or unsupported connection options
    #[error("invalid connection options: {0}")]
    Config(String),

    /// Transport-level I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Authentication was rejected or could not be performed
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The server sent something the startup handshake did not expect
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server closed the socket mid-handshake
    #[error("server closed the connection unexpectedly")]
    ConnectionClosed,

    /// Lifecycle call made in a state that forbids it (e.g. after close).
    ///
    /// This is a programming error, never a connection failure.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// What the caller was allowed to do
        expected: String,
        /// The state the object was actually in
        actual: String,
    },
}

impl Error {
    /// Fold any backend error into [`Error::ConnectFailure`], keeping its message.
    ///
    /// Programming errors pass through unchanged so they stay distinguishable.
    pub fn into_connect_failure(self) -> Self {
        match self {
            Error::ConnectFailure(_) | Error::InvalidState { .. } => self,
            other => Error::ConnectFailure(other.to_string()),
        }
    }

    /// Whether this error means "connection could not be established"
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Error::ConnectFailure(_))
    }

    /// Whether this error signals misuse of the API rather than a backend failure
    pub fn is_programming_error(&self) -> bool {
        matches!(self, Error::InvalidState { .. })
    }
}
