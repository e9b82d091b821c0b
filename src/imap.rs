//! IMAP transport
//!
//! [`ImapTransport`] implements [`MailTransport`] over an `async-imap`
//! session. Connections are TLS-only (rustls with webpki roots) and every
//! network round trip is bounded by a timeout taken from [`Settings`].

use std::borrow::Cow;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_imap::types::{Fetch, Flag};
use async_imap::{Client, Session};
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use regex::Regex;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use crate::config::{ConnectionConfig, Settings};
use crate::errors::{AppError, AppResult};
use crate::transport::{MailTransport, validate_flag, validate_mailbox};

/// Authenticated IMAP session over TLS
type ImapSession = Session<tokio_rustls::client::TlsStream<TcpStream>>;

/// Run `fut` with a deadline, mapping elapsed time to `Timeout` and command
/// failures to `Transport`
async fn bounded<T, E, F>(limit: Duration, command: &str, fut: F) -> AppResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(AppError::Transport(format!("{command} failed: {err}"))),
        Err(_) => Err(AppError::Timeout(format!(
            "{command} timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

/// Drain an untagged-response stream under the same deadline rules
async fn drain<T, E, S>(limit: Duration, command: &str, stream: S) -> AppResult<Vec<T>>
where
    S: Stream<Item = Result<T, E>>,
    E: Display,
{
    bounded(limit, command, stream.try_collect::<Vec<T>>()).await
}

/// Open a TLS connection and log in
///
/// TCP connect is bounded by `connect_timeout_ms`; the TLS handshake,
/// greeting and LOGIN each by `greeting_timeout_ms`.
///
/// # Errors
///
/// - `InvalidInput` if the host is not a valid TLS server name
/// - `AuthFailed` if the server rejects the credentials
/// - `Timeout` or `Transport` for every other failure
async fn connect_authenticated(
    settings: &Settings,
    connection: &ConnectionConfig,
) -> AppResult<ImapSession> {
    let connect_limit = Duration::from_millis(settings.connect_timeout_ms);
    let greeting_limit = Duration::from_millis(settings.greeting_timeout_ms);

    let tcp = bounded(
        connect_limit,
        "tcp connect",
        TcpStream::connect((connection.host.as_str(), connection.port)),
    )
    .await?;

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let server_name = ServerName::try_from(connection.host.clone()).map_err(|_| {
        AppError::invalid(format!("'{}' is not a valid TLS server name", connection.host))
    })?;
    let tls = bounded(
        greeting_limit,
        "TLS handshake",
        TlsConnector::from(Arc::new(tls_config)).connect(server_name, tcp),
    )
    .await?;

    let mut client = Client::new(tls);
    if bounded(greeting_limit, "IMAP greeting", client.read_response())
        .await?
        .is_none()
    {
        return Err(AppError::Transport(
            "server closed the connection before the greeting".to_owned(),
        ));
    }

    match timeout(
        greeting_limit,
        client.login(connection.user.as_str(), connection.pass.expose_secret()),
    )
    .await
    {
        Ok(Ok(session)) => Ok(session),
        Ok(Err((err, _))) => {
            let msg = err.to_string();
            if msg.to_ascii_lowercase().contains("auth") || msg.contains("LOGIN") {
                Err(AppError::AuthFailed(msg))
            } else {
                Err(AppError::Transport(format!("LOGIN failed: {msg}")))
            }
        }
        Err(_) => Err(AppError::Timeout("LOGIN timed out".to_owned())),
    }
}

fn flag_name(flag: &Flag<'_>) -> Cow<'static, str> {
    match flag {
        Flag::Seen => Cow::Borrowed("\\Seen"),
        Flag::Answered => Cow::Borrowed("\\Answered"),
        Flag::Flagged => Cow::Borrowed("\\Flagged"),
        Flag::Deleted => Cow::Borrowed("\\Deleted"),
        Flag::Draft => Cow::Borrowed("\\Draft"),
        Flag::Recent => Cow::Borrowed("\\Recent"),
        Flag::MayCreate => Cow::Borrowed("\\*"),
        Flag::Custom(name) => Cow::Owned(name.to_string()),
    }
}

/// [`MailTransport`] over one authenticated IMAP session
pub struct ImapTransport {
    session: ImapSession,
    limit: Duration,
    /// Mailbox selected by the last `list_messages`
    selected: Option<String>,
    /// Server advertises `MOVE` (RFC 6851)
    has_move: bool,
    closed: bool,
}

impl ImapTransport {
    /// Connect, authenticate and read capabilities
    pub async fn connect(settings: &Settings, connection: &ConnectionConfig) -> AppResult<Self> {
        let mut session = connect_authenticated(settings, connection).await?;
        let limit = Duration::from_millis(settings.socket_timeout_ms);
        let has_move = bounded(limit, "CAPABILITY", session.capabilities())
            .await?
            .has_str("MOVE");
        tracing::debug!(
            target: "imap",
            host = %connection.host,
            port = connection.port,
            has_move,
            "IMAP session established"
        );
        Ok(Self {
            session,
            limit,
            selected: None,
            has_move,
            closed: false,
        })
    }

    fn require_selected(&self) -> AppResult<&str> {
        self.selected
            .as_deref()
            .ok_or_else(|| AppError::Internal("no mailbox selected".to_owned()))
    }

    /// `UID FETCH` a single message
    async fn fetch_one(&mut self, uid: u32, items: &str) -> AppResult<Fetch> {
        let stream = bounded(
            self.limit,
            "UID FETCH",
            self.session.uid_fetch(uid.to_string(), items),
        )
        .await?;
        drain(self.limit, "UID FETCH", stream)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("message uid {uid}")))
    }

    /// `UID STORE` with a flag list such as `+FLAGS.SILENT (kw)`
    async fn store(&mut self, uid: u32, query: &str) -> AppResult<()> {
        let stream = bounded(
            self.limit,
            "UID STORE",
            self.session.uid_store(uid.to_string(), query),
        )
        .await?;
        drain(self.limit, "UID STORE", stream).await?;
        Ok(())
    }
}

#[async_trait]
impl MailTransport for ImapTransport {
    async fn list_messages(&mut self, mailbox: &str, filter: &str) -> AppResult<Vec<u32>> {
        validate_mailbox(mailbox, "mailbox")?;
        let selected = match timeout(self.limit, self.session.select(mailbox)).await {
            Ok(Ok(selected)) => selected,
            Ok(Err(err)) => {
                return Err(AppError::NotFound(format!(
                    "cannot select mailbox '{mailbox}': {err}"
                )));
            }
            Err(_) => {
                return Err(AppError::Timeout(format!("SELECT '{mailbox}' timed out")));
            }
        };
        self.selected = Some(mailbox.to_owned());
        tracing::debug!(
            target: "imap",
            mailbox,
            exists = selected.exists,
            uidvalidity = selected.uid_validity,
            "mailbox selected"
        );

        let mut uids: Vec<u32> =
            bounded(self.limit, "UID SEARCH", self.session.uid_search(filter))
                .await?
                .into_iter()
                .collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn read_body(&mut self, uid: u32, mark_seen: bool) -> AppResult<Vec<u8>> {
        self.require_selected()?;
        // BODY[] sets \Seen as a side effect, BODY.PEEK[] does not
        let items = if mark_seen {
            "UID BODY[]"
        } else {
            "UID BODY.PEEK[]"
        };
        let fetch = self.fetch_one(uid, items).await?;
        fetch
            .body()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| AppError::Transport(format!("message uid {uid} has no body")))
    }

    async fn set_flag(&mut self, uid: u32, name: &str, on: bool) -> AppResult<()> {
        validate_flag(name)?;
        let op = if on { '+' } else { '-' };
        self.store(uid, &format!("{op}FLAGS.SILENT ({name})")).await
    }

    async fn clear_flags_matching(&mut self, uid: u32, pattern: &Regex) -> AppResult<()> {
        let fetch = self.fetch_one(uid, "UID FLAGS").await?;
        let matching: Vec<String> = fetch
            .flags()
            .map(|flag| flag_name(&flag).into_owned())
            .filter(|flag| !flag.starts_with('\\') && pattern.is_match(flag))
            .collect();
        if matching.is_empty() {
            return Ok(());
        }
        for flag in &matching {
            validate_flag(flag)?;
        }
        tracing::debug!(target: "imap", uid, flags = ?matching, "removing stale keywords");
        self.store(uid, &format!("-FLAGS.SILENT ({})", matching.join(" ")))
            .await
    }

    async fn move_to(&mut self, uid: u32, mailbox: &str) -> AppResult<()> {
        validate_mailbox(mailbox, "destination mailbox")?;
        self.require_selected()?;
        if self.has_move {
            bounded(
                self.limit,
                "UID MOVE",
                self.session.uid_mv(uid.to_string(), mailbox),
            )
            .await
        } else {
            bounded(
                self.limit,
                "UID COPY",
                self.session.uid_copy(uid.to_string(), mailbox),
            )
            .await?;
            self.store(uid, "+FLAGS.SILENT (\\Deleted)").await
        }
    }

    async fn close(&mut self, expunge: bool) -> AppResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let (true, Some(mailbox)) = (expunge, self.selected.clone()) {
            let stream = bounded(self.limit, "EXPUNGE", self.session.expunge()).await?;
            let removed = drain(self.limit, "EXPUNGE", stream).await?.len();
            tracing::info!(target: "imap", mailbox = %mailbox, removed, "expunged deleted messages");
        }
        bounded(self.limit, "LOGOUT", self.session.logout()).await
    }
}
