//! Classifier output parsing
//!
//! rspamd answers in one of two line grammars depending on the client: the
//! legacy protocol emits a compact `Metric:` summary line, `rspamc` emits a
//! verbose block of `Key: value` lines. Both may appear in the same output,
//! in any order, or not at all. Parsing never fails: unmatched fields keep
//! their zero value and the last matching line wins for each field.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{ClassifierFailure, Verdict};

/// `RSPAMD/1.3 0 EX_OK`
static STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z]+/\d+(?:\.\d+)?\s+(-?\d+)\s+(.+)$").expect("valid status regex")
});

/// `Metric: default; True; 12.50 / 5.00 / 15.00`
static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^Metric:\s*([\w-]+);\s*((?i:true|false));\s*(-?\d+(?:\.\d{1,2})?)\s*/\s*(-?\d+(?:\.\d{1,2})?)\s*/\s*(-?\d+(?:\.\d{1,2})?)$",
    )
    .expect("valid summary regex")
});

static SPAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Spam:\s*((?i:true|false))$").expect("valid spam regex"));

static SCORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Score:\s*(-?\d+(?:\.\d+)?)\s*/\s*(-?\d+(?:\.\d+)?)$").expect("valid score regex")
});

static MESSAGE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Message-ID:\s*(.+)$").expect("valid message-id regex"));

static TIMING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Results for file:\s*stdin\s*\((\d+(?:\.\d+)?)\s*seconds\)$")
        .expect("valid timing regex")
});

/// `success = true;` from `rspamc learn_spam` / `learn_ham`
static SUCCESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^success\s*=\s*((?i:true|false));?$").expect("valid success regex")
});

/// `HTTP error: 208, <id> has been already learned as spam, ignore it`
static HTTP_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^HTTP error:\s*(\d+),\s*(\S+)\s*(.*)$").expect("valid http error regex")
});

/// Parse raw classifier output into a [`Verdict`]
///
/// Total over its input: empty or garbled output yields
/// `Verdict::default()` with only `raw_message` populated.
pub fn parse<S: AsRef<str>>(lines: &[S]) -> Verdict {
    let mut verdict = Verdict {
        raw_message: lines
            .first()
            .map(|line| line.as_ref().trim().to_owned())
            .unwrap_or_default(),
        ..Verdict::default()
    };

    for line in lines {
        apply_line(&mut verdict, line.as_ref().trim());
    }
    verdict
}

fn apply_line(verdict: &mut Verdict, line: &str) {
    if let Some(caps) = SUMMARY_RE.captures(line) {
        verdict.is_spam = caps[2].eq_ignore_ascii_case("true");
        if let Ok(score) = caps[3].parse() {
            verdict.score = score;
        }
        // `score / required / threshold`: the middle figure is ignored
        if let Ok(threshold) = caps[5].parse() {
            verdict.threshold = threshold;
        }
        verdict.scored = true;
        return;
    }

    if let Some(caps) = SPAM_RE.captures(line) {
        verdict.is_spam = caps[1].eq_ignore_ascii_case("true");
        return;
    }

    if let Some(caps) = SCORE_RE.captures(line) {
        if let Ok(score) = caps[1].parse() {
            verdict.score = score;
        }
        if let Ok(threshold) = caps[2].parse() {
            verdict.threshold = threshold;
        }
        verdict.scored = true;
        return;
    }

    if let Some(caps) = MESSAGE_ID_RE.captures(line) {
        verdict.message_reference = caps[1].trim().to_owned();
        return;
    }

    if let Some(caps) = TIMING_RE.captures(line) {
        if let Ok(seconds) = caps[1].parse() {
            verdict.elapsed_seconds = seconds;
        }
        return;
    }

    if let Some(caps) = SUCCESS_RE.captures(line) {
        verdict.learned = caps[1].eq_ignore_ascii_case("true");
        return;
    }

    if let Some(caps) = HTTP_ERROR_RE.captures(line) {
        if let Ok(code) = caps[1].parse() {
            verdict.failure = Some(ClassifierFailure {
                code,
                id: caps[2].to_owned(),
                message: caps[3].trim().to_owned(),
            });
        }
        return;
    }

    if let Some(caps) = STATUS_RE.captures(line) {
        if let Ok(code) = caps[1].parse() {
            verdict.response_code = code;
        }
        verdict.response_message = caps[2].trim().to_owned();
    }
}
