//! Mail transport capability
//!
//! The pipeline drives a mailbox exclusively through [`MailTransport`]. The
//! IMAP implementation lives in [`crate::imap`]; tests substitute an
//! in-memory mailbox.

use async_trait::async_trait;
use regex::Regex;

use crate::errors::{AppError, AppResult};

/// Mailbox operations the pipeline needs, keyed by message UID
///
/// Every error returned here is fatal to the run.
#[async_trait]
pub trait MailTransport: Send {
    /// Open `mailbox` and return the UIDs matching the search `filter`,
    /// ascending
    async fn list_messages(&mut self, mailbox: &str, filter: &str) -> AppResult<Vec<u32>>;

    /// Raw RFC822 bytes of a message in the listed mailbox
    async fn read_body(&mut self, uid: u32, mark_seen: bool) -> AppResult<Vec<u8>>;

    /// Add (`on = true`) or remove a keyword
    async fn set_flag(&mut self, uid: u32, name: &str, on: bool) -> AppResult<()>;

    /// Remove every keyword matching `pattern`
    async fn clear_flags_matching(&mut self, uid: u32, pattern: &Regex) -> AppResult<()>;

    /// Move a message out of the listed mailbox
    async fn move_to(&mut self, uid: u32, mailbox: &str) -> AppResult<()>;

    /// End the session, optionally expunging deleted messages first
    async fn close(&mut self, expunge: bool) -> AppResult<()>;
}

/// Validate mailbox name format
pub fn validate_mailbox(mailbox: &str, field: &str) -> AppResult<()> {
    if mailbox.is_empty() || mailbox.len() > 256 {
        return Err(AppError::InvalidInput(format!(
            "{field} must be 1..256 characters"
        )));
    }
    if mailbox.chars().any(|ch| ch.is_ascii_control()) {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

/// Validate an IMAP keyword or system flag atom
pub fn validate_flag(flag: &str) -> AppResult<()> {
    if flag.is_empty() || flag.len() > 64 {
        return Err(AppError::InvalidInput("invalid flag".to_owned()));
    }

    let atom = if let Some(rest) = flag.strip_prefix('\\') {
        if rest.is_empty() {
            return Err(AppError::InvalidInput("invalid flag".to_owned()));
        }
        rest
    } else {
        flag
    };

    if atom.chars().any(|ch| {
        ch.is_ascii_control()
            || ch.is_ascii_whitespace()
            || matches!(ch, '"' | '(' | ')' | '{' | '}' | '\\')
    }) {
        return Err(AppError::InvalidInput("invalid flag".to_owned()));
    }

    Ok(())
}

/// Validate IMAP SEARCH criteria supplied on the command line
pub fn validate_filter(filter: &str) -> AppResult<()> {
    if filter.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "search filter must not be empty".to_owned(),
        ));
    }
    if filter.chars().any(|ch| ch.is_ascii_control()) {
        return Err(AppError::InvalidInput(
            "search filter must not contain control characters".to_owned(),
        ));
    }
    Ok(())
}
