//! Application error model
//!
//! Defines a typed error hierarchy using `thiserror`. Every failure that can
//! reach the command boundary is one of these variants; its `Display` text is
//! the only representation that is ever written to the `error` field of the
//! response document.

use thiserror::Error;

/// Application error type
///
/// Decoder-level problems (headers, dates, bodies) never produce one of
/// these; they are absorbed where they occur.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or invalid connection parameters
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Network or TLS failure (TCP connect, handshake, greeting)
    #[error("connection failed: {0}")]
    Connection(String),
    /// Credential rejection, carrying the server's reason
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Folder selection failure (nonexistent folder, no access)
    #[error("mailbox unavailable: {0}")]
    Mailbox(String),
    /// Unexpected IMAP command status
    #[error("IMAP command failed: {0}")]
    Protocol(String),
    /// Missing or malformed command arguments
    #[error("invalid request: {0}")]
    Validation(String),
    /// A network phase exceeded its configured bound
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Unexpected failure (serialization, panic inside an operation)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `Validation`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Convenience constructor for `Config`
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Stable machine-readable code for diagnostics
    ///
    /// Attached to the log record emitted when a command fails; the response
    /// document itself only carries the human-readable message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Connection(_) => "connection",
            Self::Auth(_) => "auth",
            Self::Mailbox(_) => "mailbox",
            Self::Protocol(_) => "protocol",
            Self::Validation(_) => "validation",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal",
        }
    }
}

/// Type alias for fallible return values
pub type AppResult<T> = Result<T, AppError>;
