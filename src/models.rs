//! Verdicts, processing records and run reports
//!
//! Plain data shared by the parser, policy, store and pipeline. Records are
//! serialized with `serde` so they survive process restarts in the store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error code rspamd uses when a message was already learned
///
/// Older releases answered 404 for the same condition.
const ALREADY_LEARNED_CODES: [u16; 2] = [208, 404];

/// Structured result of classifying one message
///
/// Every field keeps its zero value when the classifier output did not
/// mention it, so a verdict parsed from empty output is `Verdict::default()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the classifier considers the message spam
    pub is_spam: bool,
    /// Classifier-reported score
    pub score: f64,
    /// Classifier-reported threshold; zero when no scored line was seen
    pub threshold: f64,
    /// Scan duration reported by the classifier (diagnostic only)
    pub elapsed_seconds: f64,
    /// Correlation id reported by the classifier, may be empty
    pub message_reference: String,
    /// First line of output, used as a human-readable headline
    pub raw_message: String,
    /// Status code from the legacy protocol status line (`RSPAMD/1.3 0 EX_OK`)
    pub response_code: i32,
    /// Status message from the legacy protocol status line
    pub response_message: String,
    /// Explicit failure reported by the classifier instead of a verdict
    pub failure: Option<ClassifierFailure>,
    /// A summary or `Score:` line was seen
    #[serde(default)]
    pub scored: bool,
    /// Training output reported `success = true`
    #[serde(default)]
    pub learned: bool,
}

impl Verdict {
    /// Whether the classifier reported that it already knows this message
    pub fn is_already_learned(&self) -> bool {
        self.failure
            .as_ref()
            .is_some_and(ClassifierFailure::is_already_learned)
    }

    /// Why this output is not a usable scan result
    pub fn scan_rejection(&self) -> Option<String> {
        self.reported_error().or_else(|| {
            (!self.scored).then(|| format!("no score in classifier output: {}", self.headline()))
        })
    }

    /// Why this output does not confirm training
    ///
    /// Check [`Verdict::is_already_learned`] first; that failure is a skip.
    pub fn learn_rejection(&self) -> Option<String> {
        self.reported_error().or_else(|| {
            (!self.learned)
                .then(|| format!("no success line in training output: {}", self.headline()))
        })
    }

    fn reported_error(&self) -> Option<String> {
        if let Some(failure) = &self.failure {
            return Some(failure.to_string());
        }
        (self.response_code != 0).then(|| {
            format!(
                "rspamd status {} {}",
                self.response_code, self.response_message
            )
        })
    }

    fn headline(&self) -> &str {
        if self.raw_message.is_empty() {
            "<empty>"
        } else {
            &self.raw_message
        }
    }
}

/// `HTTP error: <code>, <id> <message>` reported by the classifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierFailure {
    pub code: u16,
    pub id: String,
    pub message: String,
}

impl ClassifierFailure {
    /// Match the code/message pair rspamd uses for "already learned"
    pub fn is_already_learned(&self) -> bool {
        ALREADY_LEARNED_CODES.contains(&self.code)
            && self.message.to_ascii_lowercase().contains("already learned")
    }
}

impl fmt::Display for ClassifierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP error {}: {} {}", self.code, self.id, self.message)
    }
}

/// What happened to a message the first time it was processed
///
/// The variants make "verdict present" and "error text present" mutually
/// exclusive for every stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The classifier returned a verdict and the mailbox action was applied
    Classified { verdict: Verdict },
    /// The classifier already knew the message; nothing was changed
    AlreadyKnown { verdict: Verdict },
    /// Classification failed; the message was left untouched
    Failed { error: String },
}

/// Persisted record of one processing attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    /// Message UID in the transport's identifier space
    pub id: u32,
    /// When the attempt finished
    pub processed_at: DateTime<Utc>,
    pub outcome: Outcome,
}

impl ProcessingRecord {
    pub fn classified(id: u32, verdict: Verdict) -> Self {
        Self::new(id, Outcome::Classified { verdict })
    }

    pub fn already_known(id: u32, verdict: Verdict) -> Self {
        Self::new(id, Outcome::AlreadyKnown { verdict })
    }

    pub fn failed(id: u32, error: impl Into<String>) -> Self {
        Self::new(
            id,
            Outcome::Failed {
                error: error.into(),
            },
        )
    }

    fn new(id: u32, outcome: Outcome) -> Self {
        Self {
            id,
            processed_at: Utc::now(),
            outcome,
        }
    }

    /// Verdict, absent when classification failed
    pub fn verdict(&self) -> Option<&Verdict> {
        match &self.outcome {
            Outcome::Classified { verdict } | Outcome::AlreadyKnown { verdict } => Some(verdict),
            Outcome::Failed { .. } => None,
        }
    }

    /// Error text, present exactly when the verdict is absent
    pub fn error_text(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Aggregate outcome of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Candidate UIDs returned by the transport
    pub listed: usize,
    /// UIDs skipped because a record already existed
    pub skipped: usize,
    /// UIDs that received a verdict (scan) or were learned (learn)
    pub classified: usize,
    pub spam: usize,
    pub ham: usize,
    /// UIDs moved to another mailbox
    pub moved: usize,
    /// UIDs the classifier reported as already known
    pub already_known: usize,
    /// UIDs whose classification failed
    pub failed: usize,
    /// Whether a stop request ended the run before the list was exhausted
    pub stopped: bool,
}
