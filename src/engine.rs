//! Run entry points
//!
//! `run_scan` and `run_learn` validate their configuration, connect the IMAP
//! transport, build the classifier and hand everything to the generic
//! `*_mailbox` functions. Those own the store lifecycle: the namespace is
//! derived, the store opened (and optionally reset), the pipeline run, and
//! then the store and transport are released on every exit path.

use secrecy::ExposeSecret;

use crate::config::{ClassifierBackend, ConnectionConfig, LearnConfig, ScanConfig, Settings};
use crate::errors::{AppError, AppResult};
use crate::imap::ImapTransport;
use crate::models::RunReport;
use crate::pipeline::{self, LearnOptions, ScanOptions};
use crate::policy::ActionConfig;
use crate::rspamd::{self, Classifier};
use crate::shutdown::ShutdownListener;
use crate::store::{DB_FILENAME, Namespace, RecordStore};
use crate::transport::{MailTransport, validate_filter, validate_mailbox};

/// Scan a mailbox over IMAP
///
/// # Errors
///
/// Invalid configuration, connection or authentication failures, and any
/// fatal error raised during the pass.
pub async fn run_scan(
    settings: &Settings,
    config: &ScanConfig,
    stop: &ShutdownListener,
) -> AppResult<RunReport> {
    validate_scan(config)?;
    tracing::info!(
        server = %server_label(&config.connection),
        inbox = %config.inbox,
        spambox = config.spam_box.as_deref().unwrap_or("-"),
        hambox = config.ham_box.as_deref().unwrap_or("-"),
        filter = %config.filter,
        backend = ?settings.classifier.backend,
        "starting scan"
    );

    let classifier = rspamd::from_config(&settings.classifier);
    let mut transport = ImapTransport::connect(settings, &config.connection).await?;
    scan_mailbox(&mut transport, classifier.as_ref(), settings, config, stop).await
}

/// Train the classifier from a mailbox over IMAP
///
/// # Errors
///
/// As [`run_scan`]; additionally `InvalidInput` when the configured
/// classifier backend cannot train.
pub async fn run_learn(
    settings: &Settings,
    config: &LearnConfig,
    stop: &ShutdownListener,
) -> AppResult<RunReport> {
    validate_learn(config)?;
    if settings.classifier.backend != ClassifierBackend::Rspamc {
        return Err(AppError::invalid(
            "learning requires IRSPAMD_CLASSIFIER=rspamc",
        ));
    }
    tracing::info!(
        server = %server_label(&config.connection),
        learnbox = %config.learn_box,
        label = %config.label,
        filter = %config.filter,
        "starting learn"
    );

    let classifier = rspamd::from_config(&settings.classifier);
    let mut transport = ImapTransport::connect(settings, &config.connection).await?;
    learn_mailbox(&mut transport, classifier.as_ref(), settings, config, stop).await
}

/// Scan with caller-supplied collaborators
///
/// Closes `transport` before returning, expunging when `config.expunge` is
/// set.
pub async fn scan_mailbox(
    transport: &mut dyn MailTransport,
    classifier: &dyn Classifier,
    settings: &Settings,
    config: &ScanConfig,
    stop: &ShutdownListener,
) -> AppResult<RunReport> {
    let conn = &config.connection;
    let namespace = Namespace::derive(
        "scan",
        &conn.host,
        conn.port,
        &conn.user,
        &[
            config.inbox.as_str(),
            config.ham_box.as_deref().unwrap_or(""),
            config.spam_box.as_deref().unwrap_or(""),
        ],
    );
    let options = ScanOptions {
        action: ActionConfig {
            source: config.inbox.clone(),
            spam_box: config.spam_box.clone(),
            ham_box: config.ham_box.clone(),
        },
        filter: config.filter.clone(),
        force: config.force,
        flag_prefix: settings.flag_prefix.clone(),
    };

    let result = match open_store(settings, namespace, config.reset).await {
        Ok(store) => {
            let result = pipeline::scan(transport, classifier, &store, &options, stop).await;
            store.close().await;
            result
        }
        Err(err) => Err(err),
    };
    finish(transport, config.expunge, result).await
}

/// Learn with caller-supplied collaborators
///
/// Closes `transport` before returning without expunging.
pub async fn learn_mailbox(
    transport: &mut dyn MailTransport,
    classifier: &dyn Classifier,
    settings: &Settings,
    config: &LearnConfig,
    stop: &ShutdownListener,
) -> AppResult<RunReport> {
    let conn = &config.connection;
    let namespace = Namespace::derive(
        "learn",
        &conn.host,
        conn.port,
        &conn.user,
        &[config.learn_box.as_str(), config.label.as_str()],
    );
    let options = LearnOptions {
        learn_box: config.learn_box.clone(),
        label: config.label,
        filter: config.filter.clone(),
        force: config.force,
        mark_seen: config.mark_seen,
    };

    let result = match open_store(settings, namespace, config.reset).await {
        Ok(store) => {
            let result = pipeline::learn(transport, classifier, &store, &options, stop).await;
            store.close().await;
            result
        }
        Err(err) => Err(err),
    };
    finish(transport, false, result).await
}

async fn open_store(settings: &Settings, namespace: Namespace, reset: bool) -> AppResult<RecordStore> {
    let path = settings.data_dir.join(DB_FILENAME);
    let store = RecordStore::open(&path, namespace).await?;
    match prepare_store(&store, reset).await {
        Ok(known) => {
            tracing::debug!(
                path = %path.display(),
                namespace = %store.namespace(),
                known,
                "record store opened"
            );
            Ok(store)
        }
        Err(err) => {
            store.close().await;
            Err(err)
        }
    }
}

/// Apply a requested reset and count the records left in the namespace
async fn prepare_store(store: &RecordStore, reset: bool) -> AppResult<u64> {
    if reset {
        let removed = store.reset().await?;
        tracing::info!(removed, "record namespace reset");
    }
    store.count().await
}

/// Close the transport; a close failure only surfaces when the run succeeded
async fn finish(
    transport: &mut dyn MailTransport,
    expunge: bool,
    result: AppResult<RunReport>,
) -> AppResult<RunReport> {
    let closed = transport.close(expunge).await;
    match (result, closed) {
        (Ok(report), Ok(())) => Ok(report),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            tracing::warn!(error = %close_err, "failed to close mail session");
            Err(err)
        }
    }
}

fn validate_scan(config: &ScanConfig) -> AppResult<()> {
    validate_connection(&config.connection)?;
    validate_mailbox(&config.inbox, "inbox")?;
    if let Some(spam_box) = &config.spam_box {
        validate_mailbox(spam_box, "spambox")?;
    }
    if let Some(ham_box) = &config.ham_box {
        validate_mailbox(ham_box, "hambox")?;
    }
    validate_filter(&config.filter)
}

fn validate_learn(config: &LearnConfig) -> AppResult<()> {
    validate_connection(&config.connection)?;
    validate_mailbox(&config.learn_box, "learnbox")?;
    validate_filter(&config.filter)
}

fn validate_connection(conn: &ConnectionConfig) -> AppResult<()> {
    if conn.host.trim().is_empty() {
        return Err(AppError::invalid("host must not be empty"));
    }
    if conn.user.trim().is_empty() {
        return Err(AppError::invalid("user must not be empty"));
    }
    if conn.pass.expose_secret().is_empty() {
        return Err(AppError::invalid(
            "password must not be empty; pass --pass or set IMAP_PASSWORD",
        ));
    }
    Ok(())
}

fn server_label(conn: &ConnectionConfig) -> String {
    format!("{}@{}:{}", conn.user, conn.host, conn.port)
}
