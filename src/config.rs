//! Configuration for connections, classifier backends and runs
//!
//! Runtime settings (timeouts, classifier location, data directory) are
//! loaded from environment variables; per-run parameters (mailboxes and
//! switches) come from the command line and are assembled into
//! [`ScanConfig`] / [`LearnConfig`].

use std::env;
use std::env::VarError;
use std::path::PathBuf;

use secrecy::SecretString;

use crate::errors::{AppError, AppResult};
use crate::rspamd::TrainLabel;

/// IMAP connection parameters
///
/// Passwords are stored using `SecretString` to prevent accidental logging.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// IMAP server hostname
    pub host: String,
    /// IMAP server port (TLS, typically 993)
    pub port: u16,
    /// Username for authentication
    pub user: String,
    /// Password stored in a type that prevents accidental logging
    pub pass: SecretString,
}

/// Which rspamd client the classifier collaborator uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierBackend {
    /// Legacy `RSPAMC/1.3` line protocol over TCP
    Socket,
    /// External `rspamc` process
    Rspamc,
}

impl ClassifierBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "socket" | "rspamd" => Some(Self::Socket),
            "rspamc" | "process" => Some(Self::Rspamc),
            _ => None,
        }
    }
}

/// Classifier collaborator settings
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub backend: ClassifierBackend,
    /// rspamd host for the socket backend
    pub host: String,
    /// rspamd normal worker port for the socket backend
    pub port: u16,
    /// Per-invocation timeout in milliseconds
    pub timeout_ms: u64,
    /// `rspamc` executable for the process backend
    pub rspamc_path: PathBuf,
}

/// Process-wide settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// TCP connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// IMAP greeting/TLS handshake timeout in milliseconds
    pub greeting_timeout_ms: u64,
    /// Socket I/O timeout in milliseconds
    pub socket_timeout_ms: u64,
    pub classifier: ClassifierConfig,
    /// Directory holding the record store
    pub data_dir: PathBuf,
    /// Prefix of the score bucket keyword set on scanned messages
    pub flag_prefix: String,
}

impl Settings {
    /// Load all settings from environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a variable is set to a malformed value or no
    /// data directory can be determined.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// IRSPAMD_CLASSIFIER=rspamc
    /// RSPAMD_HOST=127.0.0.1
    /// RSPAMD_PORT=11333
    /// RSPAMD_TIMEOUT_MS=10000
    /// IRSPAMD_DATA_DIR=/var/lib/irspamd
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let backend = match optional_env("IRSPAMD_CLASSIFIER")? {
            Some(v) => ClassifierBackend::parse(&v).ok_or_else(|| {
                AppError::InvalidInput(format!(
                    "invalid IRSPAMD_CLASSIFIER '{v}'; expected 'socket' or 'rspamc'"
                ))
            })?,
            None => ClassifierBackend::Socket,
        };

        let data_dir = match optional_env("IRSPAMD_DATA_DIR")? {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_local_dir()
                .map(|dir| dir.join("irspamd"))
                .ok_or_else(|| {
                    AppError::InvalidInput(
                        "cannot determine a data directory; set IRSPAMD_DATA_DIR".to_owned(),
                    )
                })?,
        };

        let flag_prefix =
            optional_env("IRSPAMD_FLAG_PREFIX")?.unwrap_or_else(|| "RSPAMD_SCORE_".to_owned());
        validate_flag_prefix(&flag_prefix)?;

        Ok(Self {
            connect_timeout_ms: parse_u64_env("IRSPAMD_CONNECT_TIMEOUT_MS", 30_000)?,
            greeting_timeout_ms: parse_u64_env("IRSPAMD_GREETING_TIMEOUT_MS", 15_000)?,
            socket_timeout_ms: parse_u64_env("IRSPAMD_SOCKET_TIMEOUT_MS", 300_000)?,
            classifier: ClassifierConfig {
                backend,
                host: optional_env("RSPAMD_HOST")?.unwrap_or_else(|| "127.0.0.1".to_owned()),
                port: parse_u16_env("RSPAMD_PORT", 11333)?,
                timeout_ms: parse_u64_env("RSPAMD_TIMEOUT_MS", 10_000)?,
                rspamc_path: optional_env("RSPAMC_PATH")?
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("rspamc")),
            },
            data_dir,
            flag_prefix,
        })
    }
}

/// Parameters of one scan run
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub connection: ConnectionConfig,
    /// Mailbox to scan
    pub inbox: String,
    /// Destination for spam; spam stays in the inbox when unset
    pub spam_box: Option<String>,
    /// Destination for ham; ham stays in the inbox when unset
    pub ham_box: Option<String>,
    /// IMAP SEARCH criteria selecting candidate messages
    pub filter: String,
    /// Expunge deleted messages from the inbox when closing
    pub expunge: bool,
    /// Reprocess messages that already have a record
    pub force: bool,
    /// Clear the dedup namespace before the run
    pub reset: bool,
}

/// Parameters of one learn run
#[derive(Debug, Clone)]
pub struct LearnConfig {
    pub connection: ConnectionConfig,
    /// Mailbox whose messages are learned
    pub learn_box: String,
    pub label: TrainLabel,
    /// IMAP SEARCH criteria selecting candidate messages
    pub filter: String,
    /// Fetch bodies in a way that marks messages `\Seen`
    pub mark_seen: bool,
    /// Relearn messages that already have a record
    pub force: bool,
    /// Clear the dedup namespace before the run
    pub reset: bool,
}

/// Keyword prefixes must form a valid IMAP atom once a bucket is appended
fn validate_flag_prefix(prefix: &str) -> AppResult<()> {
    if prefix.is_empty()
        || prefix.len() > 48
        || prefix.starts_with('\\')
        || prefix.chars().any(|ch| {
            ch.is_ascii_control()
                || ch.is_ascii_whitespace()
                || matches!(ch, '"' | '(' | ')' | '{' | '}' | '\\' | '%' | '*' | ']')
        })
    {
        return Err(AppError::InvalidInput(format!(
            "invalid IRSPAMD_FLAG_PREFIX '{prefix}'"
        )));
    }
    Ok(())
}

/// Read an optional environment variable, treating empty values as unset
fn optional_env(key: &str) -> AppResult<Option<String>> {
    match env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `u16` environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u16`.
fn parse_u16_env(key: &str, default: u16) -> AppResult<u16> {
    match optional_env(key)? {
        Some(v) => v.trim().parse::<u16>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u16 environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

/// Parse a `u64` environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u64`.
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match optional_env(key)? {
        Some(v) => v.trim().parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::{ClassifierBackend, validate_flag_prefix};

    #[test]
    fn classifier_backend_accepts_known_names() {
        assert_eq!(ClassifierBackend::parse("socket"), Some(ClassifierBackend::Socket));
        assert_eq!(ClassifierBackend::parse(" RSPAMC "), Some(ClassifierBackend::Rspamc));
        assert_eq!(ClassifierBackend::parse("process"), Some(ClassifierBackend::Rspamc));
        assert_eq!(ClassifierBackend::parse("http"), None);
    }

    #[test]
    fn flag_prefix_must_be_an_atom() {
        validate_flag_prefix("RSPAMD_SCORE_").expect("default prefix is valid");
        validate_flag_prefix("$Spam-").expect("keyword prefix is valid");
        for invalid in ["", "\\Seen", "a b", "x)", "pre\r"] {
            assert!(validate_flag_prefix(invalid).is_err(), "{invalid:?} must be rejected");
        }
    }
}
