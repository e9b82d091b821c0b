//! Per-message scan and learn pipelines
//!
//! One pass over a mailbox: list candidate UIDs, then for each UID in order
//! check the record store, fetch the body, invoke the classifier, parse its
//! output, apply the mailbox action and persist the outcome before moving
//! on. A message is fully processed (including its record) before the next
//! one starts, and stop requests are honoured only between messages.
//!
//! Transport and store failures abort the pass; classifier failures are
//! recorded against the message and the pass continues.

use regex::Regex;

use crate::errors::{AppError, AppResult};
use crate::mime;
use crate::models::{ProcessingRecord, RunReport, Verdict};
use crate::parser;
use crate::policy::{self, Action, ActionConfig};
use crate::rspamd::{Classifier, TrainLabel};
use crate::shutdown::ShutdownListener;
use crate::store::RecordStore;
use crate::transport::MailTransport;

/// Inputs of one scan pass
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub action: ActionConfig,
    /// IMAP SEARCH criteria
    pub filter: String,
    /// Reprocess messages that already have a record
    pub force: bool,
    /// Keyword prefix for score buckets
    pub flag_prefix: String,
}

/// Inputs of one learn pass
#[derive(Debug, Clone)]
pub struct LearnOptions {
    pub learn_box: String,
    pub label: TrainLabel,
    pub filter: String,
    pub force: bool,
    pub mark_seen: bool,
}

/// Run one scan pass over `options.action.source`
///
/// # Errors
///
/// Fatal transport and store errors, annotated with the UID being
/// processed. Records written before the failure are kept.
pub async fn scan(
    transport: &mut dyn MailTransport,
    classifier: &dyn Classifier,
    store: &RecordStore,
    options: &ScanOptions,
    stop: &ShutdownListener,
) -> AppResult<RunReport> {
    let bucket_flags = Regex::new(&format!("^{}", regex::escape(&options.flag_prefix)))
        .map_err(|e| AppError::Internal(format!("invalid flag prefix pattern: {e}")))?;

    let source = options.action.source.as_str();
    let uids = transport.list_messages(source, &options.filter).await?;
    let mut report = RunReport {
        listed: uids.len(),
        ..RunReport::default()
    };

    if uids.is_empty() {
        tracing::info!(mailbox = source, "no messages to scan");
        return Ok(report);
    }
    tracing::info!(mailbox = source, count = uids.len(), "checking messages for spam");

    for uid in uids {
        if stop.is_triggered() {
            report.stopped = true;
            break;
        }

        if !options.force && already_processed(store, uid).await? {
            report.skipped += 1;
            continue;
        }

        let body = transport
            .read_body(uid, false)
            .await
            .map_err(|e| e.for_uid(uid))?;
        let headline = mime::headline(&body);

        let record = match classifier.classify(&body).await {
            Ok(lines) => {
                let verdict = parser::parse(&lines);
                match verdict.scan_rejection() {
                    Some(reason) => {
                        tracing::warn!(
                            uid,
                            subject = %headline.subject,
                            error = %reason,
                            "classifier returned no verdict"
                        );
                        report.failed += 1;
                        ProcessingRecord::failed(uid, reason)
                    }
                    None => {
                        tracing::info!(
                            uid,
                            subject = %headline.subject,
                            from = %headline.from,
                            spam = verdict.is_spam,
                            score = verdict.score,
                            threshold = verdict.threshold,
                            "message classified"
                        );
                        let moved = apply_verdict(transport, uid, &verdict, options, &bucket_flags)
                            .await
                            .map_err(|e| e.for_uid(uid))?;
                        report.classified += 1;
                        if verdict.is_spam {
                            report.spam += 1;
                        } else {
                            report.ham += 1;
                        }
                        if moved {
                            report.moved += 1;
                        }
                        ProcessingRecord::classified(uid, verdict)
                    }
                }
            }
            Err(err) if !err.is_fatal() => {
                tracing::warn!(uid, subject = %headline.subject, error = %err, "classification failed");
                report.failed += 1;
                ProcessingRecord::failed(uid, err.to_string())
            }
            Err(err) => return Err(err.for_uid(uid)),
        };

        store.put(&record).await.map_err(|e| e.for_uid(uid))?;
    }

    Ok(report)
}

/// Replace the bucket keyword and apply the policy action
///
/// Returns whether the message was moved.
async fn apply_verdict(
    transport: &mut dyn MailTransport,
    uid: u32,
    verdict: &Verdict,
    options: &ScanOptions,
    bucket_flags: &Regex,
) -> AppResult<bool> {
    transport.clear_flags_matching(uid, bucket_flags).await?;
    let label = policy::flag_label(&options.flag_prefix, verdict);
    transport.set_flag(uid, &label, true).await?;

    match policy::decide(verdict, &options.action) {
        Action::MoveTo(mailbox) => {
            transport.move_to(uid, &mailbox).await?;
            tracing::info!(uid, flag = %label, to = %mailbox, "message moved");
            Ok(true)
        }
        Action::LeaveInPlace => {
            tracing::debug!(uid, flag = %label, "message left in place");
            Ok(false)
        }
    }
}

/// Run one learn pass over `options.learn_box`
///
/// # Errors
///
/// Fatal transport and store errors, annotated with the UID being
/// processed.
pub async fn learn(
    transport: &mut dyn MailTransport,
    classifier: &dyn Classifier,
    store: &RecordStore,
    options: &LearnOptions,
    stop: &ShutdownListener,
) -> AppResult<RunReport> {
    let uids = transport
        .list_messages(&options.learn_box, &options.filter)
        .await?;
    let mut report = RunReport {
        listed: uids.len(),
        ..RunReport::default()
    };
    tracing::info!(
        mailbox = %options.learn_box,
        label = %options.label,
        count = uids.len(),
        "learning messages"
    );

    for uid in uids {
        if stop.is_triggered() {
            report.stopped = true;
            break;
        }

        if !options.force && already_processed(store, uid).await? {
            report.skipped += 1;
            continue;
        }

        let body = transport
            .read_body(uid, options.mark_seen)
            .await
            .map_err(|e| e.for_uid(uid))?;

        let record = match classifier.train(options.label, &body).await {
            Ok(lines) => {
                let verdict = parser::parse(&lines);
                if verdict.is_already_learned() {
                    tracing::info!(uid, label = %options.label, "message already learned");
                    report.already_known += 1;
                    ProcessingRecord::already_known(uid, verdict)
                } else if let Some(reason) = verdict.learn_rejection() {
                    tracing::warn!(uid, error = %reason, "learning rejected");
                    report.failed += 1;
                    ProcessingRecord::failed(uid, reason)
                } else {
                    tracing::info!(uid, label = %options.label, response = %verdict.raw_message, "message learned");
                    report.classified += 1;
                    match options.label {
                        TrainLabel::Spam => report.spam += 1,
                        TrainLabel::Ham => report.ham += 1,
                    }
                    ProcessingRecord::classified(uid, verdict)
                }
            }
            Err(err) if !err.is_fatal() => {
                tracing::warn!(uid, error = %err, "learning failed");
                report.failed += 1;
                ProcessingRecord::failed(uid, err.to_string())
            }
            Err(err) => return Err(err.for_uid(uid)),
        };

        store.put(&record).await.map_err(|e| e.for_uid(uid))?;
    }

    Ok(report)
}

async fn already_processed(store: &RecordStore, uid: u32) -> AppResult<bool> {
    let Some(record) = store.get(uid).await.map_err(|e| e.for_uid(uid))? else {
        return Ok(false);
    };
    match record.verdict() {
        Some(verdict) => tracing::debug!(
            uid,
            at = %record.processed_at,
            spam = verdict.is_spam,
            score = verdict.score,
            "message already processed"
        ),
        None => tracing::debug!(
            uid,
            at = %record.processed_at,
            error = record.error_text().unwrap_or_default(),
            "message already attempted"
        ),
    }
    Ok(true)
}
