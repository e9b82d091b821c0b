//! Verdict-to-action policy
//!
//! Pure functions: quantize a verdict's score into a flag label and decide
//! where the message goes. Missing configuration always resolves to leaving
//! the message where it is.

use crate::models::Verdict;

/// Upper bound for the score bucket (ten times the threshold)
const MAX_BUCKET: u32 = 1000;

/// Mailbox action derived from a verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    MoveTo(String),
    LeaveInPlace,
}

/// Mailbox roles the policy chooses between
#[derive(Debug, Clone, Default)]
pub struct ActionConfig {
    /// Mailbox being scanned
    pub source: String,
    /// Destination for spam; spam stays in `source` when unset
    pub spam_box: Option<String>,
    /// Destination for ham; opt-in, ham stays in `source` when unset
    pub ham_box: Option<String>,
}

/// Quantize `score / threshold` to a multiple of ten percent
///
/// A zero, negative or non-finite ratio yields the sentinel bucket `0`; the
/// result is capped at [`MAX_BUCKET`].
pub fn bucket(verdict: &Verdict) -> String {
    bucket_value(verdict).to_string()
}

fn bucket_value(verdict: &Verdict) -> u32 {
    if verdict.threshold == 0.0 || !verdict.threshold.is_finite() {
        return 0;
    }
    let percent = (verdict.score * 100.0 / verdict.threshold).floor();
    if !percent.is_finite() || percent <= 0.0 {
        return 0;
    }
    let percent = percent.min(f64::from(MAX_BUCKET)) as u32;
    percent / 10 * 10
}

/// Mailbox keyword carrying the bucket, e.g. `RSPAMD_SCORE_80`
pub fn flag_label(prefix: &str, verdict: &Verdict) -> String {
    format!("{prefix}{}", bucket(verdict))
}

/// Decide the mailbox action for a verdict
///
/// Spam goes to the spam box when one is configured, ham goes to the ham box
/// only when one was explicitly configured. A destination equal to the
/// source mailbox is treated as leaving the message in place.
pub fn decide(verdict: &Verdict, config: &ActionConfig) -> Action {
    let target = if verdict.is_spam {
        config.spam_box.as_deref()
    } else {
        config.ham_box.as_deref()
    };

    match target {
        Some(mailbox) if !mailbox.is_empty() && mailbox != config.source => {
            Action::MoveTo(mailbox.to_owned())
        }
        _ => Action::LeaveInPlace,
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, ActionConfig, bucket, decide, flag_label};
    use crate::models::Verdict;

    fn verdict(is_spam: bool, score: f64, threshold: f64) -> Verdict {
        Verdict {
            is_spam,
            score,
            threshold,
            ..Verdict::default()
        }
    }

    fn config(spam_box: Option<&str>, ham_box: Option<&str>) -> ActionConfig {
        ActionConfig {
            source: "INBOX".to_owned(),
            spam_box: spam_box.map(str::to_owned),
            ham_box: ham_box.map(str::to_owned),
        }
    }

    #[test]
    fn buckets_floor_to_ten_percent() {
        assert_eq!(bucket(&verdict(true, 8.0, 10.0)), "80");
        assert_eq!(bucket(&verdict(false, 2.9, 10.0)), "20");
        assert_eq!(bucket(&verdict(false, 2.9, 15.0)), "10");
        assert_eq!(bucket(&verdict(true, 15.0, 15.0)), "100");
        assert_eq!(flag_label("RSPAMD_SCORE_", &verdict(true, 8.0, 10.0)), "RSPAMD_SCORE_80");
    }

    #[test]
    fn degenerate_ratios_fall_back_to_zero_bucket() {
        assert_eq!(bucket(&verdict(false, 0.0, 0.0)), "0");
        assert_eq!(bucket(&verdict(false, 5.0, 0.0)), "0");
        assert_eq!(bucket(&verdict(false, -3.0, 15.0)), "0");
        assert_eq!(bucket(&verdict(false, 1.0, f64::NAN)), "0");
        assert_eq!(bucket(&verdict(true, f64::INFINITY, 15.0)), "0");
    }

    #[test]
    fn huge_ratios_are_capped() {
        assert_eq!(bucket(&verdict(true, 9999.0, 1.0)), "1000");
    }

    #[test]
    fn spam_moves_only_when_spam_box_configured() {
        assert_eq!(
            decide(&verdict(true, 20.0, 15.0), &config(Some("Spam"), None)),
            Action::MoveTo("Spam".to_owned())
        );
        assert_eq!(
            decide(&verdict(true, 20.0, 15.0), &config(None, Some("Ham"))),
            Action::LeaveInPlace
        );
    }

    #[test]
    fn ham_moves_only_when_ham_box_configured() {
        assert_eq!(
            decide(&verdict(false, 1.0, 15.0), &config(Some("Spam"), None)),
            Action::LeaveInPlace
        );
        assert_eq!(
            decide(&verdict(false, 1.0, 15.0), &config(Some("Spam"), Some("Ham"))),
            Action::MoveTo("Ham".to_owned())
        );
    }

    #[test]
    fn destination_equal_to_source_leaves_in_place() {
        assert_eq!(
            decide(&verdict(false, 1.0, 15.0), &config(None, Some("INBOX"))),
            Action::LeaveInPlace
        );
        assert_eq!(
            decide(&verdict(true, 20.0, 15.0), &config(Some(""), None)),
            Action::LeaveInPlace
        );
    }
}
