//! rspamd classifier collaborators
//!
//! Two ways to reach rspamd sit behind the [`Classifier`] trait: the legacy
//! `RSPAMC/1.3` line protocol spoken directly over TCP, and the `rspamc`
//! command-line client run as a child process. Both return the raw output
//! lines; interpretation is left to [`crate::parser`]. Every failure here is
//! reported as `AppError::Classifier`, which the pipeline records against the
//! message rather than aborting the run.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::{ClassifierBackend, ClassifierConfig};
use crate::errors::{AppError, AppResult};
use crate::parser;

/// Training label for the learn path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainLabel {
    Ham,
    Spam,
}

impl TrainLabel {
    /// rspamc command performing this training
    pub fn command(self) -> &'static str {
        match self {
            Self::Ham => "learn_ham",
            Self::Spam => "learn_spam",
        }
    }

    /// Stable name used in store namespaces and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ham => "ham",
            Self::Spam => "spam",
        }
    }
}

impl fmt::Display for TrainLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spam classifier capability
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Check a raw RFC822 message and return the classifier's output lines
    async fn classify(&self, body: &[u8]) -> AppResult<Vec<String>>;

    /// Train the classifier with a raw RFC822 message
    async fn train(&self, label: TrainLabel, body: &[u8]) -> AppResult<Vec<String>>;
}

/// Build the classifier selected by configuration
pub fn from_config(config: &ClassifierConfig) -> Box<dyn Classifier> {
    let limit = Duration::from_millis(config.timeout_ms);
    match config.backend {
        ClassifierBackend::Socket => Box::new(RspamdSocket {
            host: config.host.clone(),
            port: config.port,
            timeout: limit,
        }),
        ClassifierBackend::Rspamc => Box::new(RspamcCommand {
            program: config.rspamc_path.clone(),
            host: config.host.clone(),
            timeout: limit,
        }),
    }
}

/// Legacy `RSPAMC/1.3` protocol client
#[derive(Debug, Clone)]
pub struct RspamdSocket {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl RspamdSocket {
    async fn exchange(&self, body: &[u8]) -> AppResult<Vec<String>> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                AppError::Classifier(format!(
                    "cannot connect to rspamd at {}:{}: {e}",
                    self.host, self.port
                ))
            })?;

        let header = format!("CHECK RSPAMC/1.3\r\nContent-length: {}\r\n\r\n", body.len());
        stream
            .write_all(header.as_bytes())
            .await
            .map_err(|e| AppError::Classifier(format!("rspamd request failed: {e}")))?;
        stream
            .write_all(body)
            .await
            .map_err(|e| AppError::Classifier(format!("rspamd request failed: {e}")))?;
        stream
            .shutdown()
            .await
            .map_err(|e| AppError::Classifier(format!("rspamd request failed: {e}")))?;

        let mut reader = BufReader::new(stream);
        let mut lines = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .await
                .map_err(|e| AppError::Classifier(format!("rspamd response failed: {e}")))?;
            if read == 0 {
                break;
            }
            lines.push(String::from_utf8_lossy(&buf).trim_end().to_owned());
        }
        Ok(lines)
    }
}

#[async_trait]
impl Classifier for RspamdSocket {
    async fn classify(&self, body: &[u8]) -> AppResult<Vec<String>> {
        timeout(self.timeout, self.exchange(body))
            .await
            .map_err(|_| {
                AppError::Classifier(format!(
                    "rspamd did not answer within {}ms",
                    self.timeout.as_millis()
                ))
            })?
    }

    async fn train(&self, label: TrainLabel, _body: &[u8]) -> AppResult<Vec<String>> {
        Err(AppError::Classifier(format!(
            "{} is not available over the rspamd socket protocol; use the rspamc backend",
            label.command()
        )))
    }
}

/// `rspamc` child-process client
#[derive(Debug, Clone)]
pub struct RspamcCommand {
    pub program: PathBuf,
    /// rspamd host passed via `-h`; rspamc picks the port per command
    pub host: String,
    pub timeout: Duration,
}

impl RspamcCommand {
    fn args(&self, command: &str) -> Vec<String> {
        vec!["-h".to_owned(), self.host.clone(), command.to_owned()]
    }

    async fn run(&self, command: &str, body: &[u8]) -> AppResult<Vec<String>> {
        self.exec(&self.args(command), command, body).await
    }

    /// Spawn the client with `args`, feed `body` on stdin and collect output
    ///
    /// A non-zero exit is an error unless the output carries an `HTTP error:`
    /// line, which rspamc uses for "already learned" and similar answers.
    async fn exec(&self, args: &[String], command: &str, body: &[u8]) -> AppResult<Vec<String>> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::Classifier(format!("cannot run {}: {e}", self.program.display()))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Classifier("rspamc stdin unavailable".to_owned()))?;
        let feed = async move {
            let res = stdin.write_all(body).await;
            drop(stdin);
            res
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output
            .map_err(|e| AppError::Classifier(format!("rspamc {command} failed: {e}")))?;
        if let Err(err) = fed {
            tracing::debug!(target: "rspamd", error = %err, "rspamc closed stdin early");
        }

        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.trim_end().to_owned())
            .collect();
        lines.extend(
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(|line| line.trim_end().to_owned())
                .filter(|line| !line.is_empty()),
        );

        if !output.status.success() && parser::parse(&lines).failure.is_none() {
            let detail = lines
                .iter()
                .find(|line| !line.is_empty())
                .map_or("no output", String::as_str);
            return Err(AppError::Classifier(format!(
                "rspamc {command} exited with {}: {detail}",
                output.status
            )));
        }
        tracing::debug!(target: "rspamd", command, lines = lines.len(), "rspamc finished");
        Ok(lines)
    }

    async fn run_bounded(&self, command: &str, body: &[u8]) -> AppResult<Vec<String>> {
        timeout(self.timeout, self.run(command, body))
            .await
            .map_err(|_| {
                AppError::Classifier(format!(
                    "rspamc {command} did not finish within {}ms",
                    self.timeout.as_millis()
                ))
            })?
    }
}

#[async_trait]
impl Classifier for RspamcCommand {
    async fn classify(&self, body: &[u8]) -> AppResult<Vec<String>> {
        self.run_bounded("symbols", body).await
    }

    async fn train(&self, label: TrainLabel, body: &[u8]) -> AppResult<Vec<String>> {
        self.run_bounded(label.command(), body).await
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::{Classifier, RspamcCommand, RspamdSocket, TrainLabel};
    use crate::errors::AppError;

    #[test]
    fn train_labels_map_to_rspamc_commands() {
        assert_eq!(TrainLabel::Ham.command(), "learn_ham");
        assert_eq!(TrainLabel::Spam.command(), "learn_spam");
        assert_eq!(TrainLabel::Spam.to_string(), "spam");
    }

    #[tokio::test]
    async fn socket_client_speaks_legacy_protocol() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            conn.read_to_end(&mut request).await.expect("read request");
            conn.write_all(
                b"RSPAMD/1.3 0 EX_OK\r\nMetric: default; True; 16.00 / 10.00 / 15.00  \r\n",
            )
            .await
            .expect("write response");
            String::from_utf8(request).expect("utf8 request")
        });

        let client = RspamdSocket {
            host: "127.0.0.1".to_owned(),
            port,
            timeout: Duration::from_secs(5),
        };
        let lines = client.classify(b"Subject: hi\r\n\r\nbody").await.expect("classify");
        assert_eq!(
            lines,
            vec![
                "RSPAMD/1.3 0 EX_OK".to_owned(),
                "Metric: default; True; 16.00 / 10.00 / 15.00".to_owned(),
            ]
        );

        let request = server.await.expect("server task");
        assert_eq!(
            request,
            "CHECK RSPAMC/1.3\r\nContent-length: 19\r\n\r\nSubject: hi\r\n\r\nbody"
        );
    }

    #[tokio::test]
    async fn socket_client_reports_unreachable_rspamd_as_classifier_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let client = RspamdSocket {
            host: "127.0.0.1".to_owned(),
            port,
            timeout: Duration::from_secs(5),
        };
        let err = client.classify(b"x").await.expect_err("must fail");
        assert!(matches!(err, AppError::Classifier(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn socket_client_cannot_train() {
        let client = RspamdSocket {
            host: "127.0.0.1".to_owned(),
            port: 11333,
            timeout: Duration::from_secs(1),
        };
        let err = client.train(TrainLabel::Ham, b"x").await.expect_err("must fail");
        assert!(err.to_string().contains("learn_ham"));
    }

    #[test]
    fn rspamc_args_pass_host_and_command() {
        let client = RspamcCommand {
            program: PathBuf::from("rspamc"),
            host: "10.0.0.5".to_owned(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(client.args("learn_spam"), vec!["-h", "10.0.0.5", "learn_spam"]);
    }

    #[tokio::test]
    async fn missing_rspamc_binary_is_a_classifier_error() {
        let client = RspamcCommand {
            program: PathBuf::from("/nonexistent/irspamd-test/rspamc"),
            host: "127.0.0.1".to_owned(),
            timeout: Duration::from_secs(5),
        };
        let err = client.classify(b"x").await.expect_err("must fail");
        assert!(matches!(err, AppError::Classifier(_)));
    }

    /// `sh` standing in for the rspamc binary
    fn shell_client() -> RspamcCommand {
        RspamcCommand {
            program: PathBuf::from("sh"),
            host: "127.0.0.1".to_owned(),
            timeout: Duration::from_secs(5),
        }
    }

    fn script(body: &str) -> Vec<String> {
        vec!["-c".to_owned(), body.to_owned()]
    }

    #[tokio::test]
    async fn rspamc_failure_exit_with_diagnostics_is_a_classifier_error() {
        let client = shell_client();
        let err = client
            .exec(
                &script("echo 'cannot connect to 127.0.0.1:11333: Connection refused' >&2; exit 1"),
                "symbols",
                b"Subject: x\r\n\r\nbody",
            )
            .await
            .expect_err("non-zero exit must fail");
        assert!(matches!(err, AppError::Classifier(_)));
        assert!(err.to_string().contains("Connection refused"));
    }

    #[tokio::test]
    async fn rspamc_http_error_survives_failure_exit() {
        let client = shell_client();
        let lines = client
            .exec(
                &script(
                    "echo 'HTTP error: 208, <a@example.com> has been already learned as spam, ignore it'; exit 1",
                ),
                "learn_spam",
                b"",
            )
            .await
            .expect("http error output is returned");
        assert!(crate::parser::parse(&lines).is_already_learned());
    }

    #[tokio::test]
    async fn rspamc_output_lines_are_collected() {
        let client = shell_client();
        let lines = client
            .exec(
                &script("cat >/dev/null; echo 'Spam: false'; echo 'Score: 1.00 / 15.00  '"),
                "symbols",
                b"Subject: x\r\n\r\nbody",
            )
            .await
            .expect("successful run");
        assert_eq!(lines, vec!["Spam: false", "Score: 1.00 / 15.00"]);
    }
}
