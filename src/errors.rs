//! Application error model
//!
//! Defines a typed error hierarchy using `thiserror`. Variants are split along
//! the run-level taxonomy: transport, store and configuration failures abort a
//! run, classifier failures are recorded against a single message.

use thiserror::Error;

/// Application error type
///
/// Covers every failure the scan and learn pipelines may encounter. Use
/// [`AppError::is_fatal`] to decide whether a failure ends the run.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (validation failed, malformed configuration)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Resource not found (mailbox, message)
    #[error("not found: {0}")]
    NotFound(String),
    /// Authentication failure (bad credentials, account disabled)
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Transport operation timeout (TCP connect, TLS handshake, IMAP response)
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Mail transport failure (IMAP command rejected, connection lost)
    #[error("transport error: {0}")]
    Transport(String),
    /// Classifier invocation failure (rspamd unreachable, rspamc failed, timeout)
    #[error("classifier error: {0}")]
    Classifier(String),
    /// Idempotency store failure (open, read, write)
    #[error("store error: {0}")]
    Store(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error must abort the current run
    ///
    /// Only classifier failures are recoverable: they are recorded against
    /// the message being processed and the scan moves on. Everything else
    /// (connection, listing, body reads, flag/move commands, store I/O)
    /// leaves the run without a trustworthy transport or dedup record.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Classifier(_))
    }

    /// Prefix the error message with the UID it concerns
    pub fn for_uid(self, uid: u32) -> Self {
        let annotate = |msg: String| format!("uid {uid}: {msg}");
        match self {
            Self::InvalidInput(m) => Self::InvalidInput(annotate(m)),
            Self::NotFound(m) => Self::NotFound(annotate(m)),
            Self::AuthFailed(m) => Self::AuthFailed(annotate(m)),
            Self::Timeout(m) => Self::Timeout(annotate(m)),
            Self::Transport(m) => Self::Transport(annotate(m)),
            Self::Classifier(m) => Self::Classifier(annotate(m)),
            Self::Store(m) => Self::Store(annotate(m)),
            Self::Internal(m) => Self::Internal(annotate(m)),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;
