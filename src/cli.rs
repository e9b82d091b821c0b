//! Command-line interface
//!
//! Connection arguments precede the subcommand:
//! `irspamd -H imap.example.com -u alice scan -s Junk`.

use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;

use crate::config::{ConnectionConfig, LearnConfig, ScanConfig};
use crate::rspamd::TrainLabel;

#[derive(Parser, Debug)]
#[command(name = "irspamd", version)]
#[command(about = "Classify IMAP mailboxes with rspamd", long_about = None)]
pub struct Cli {
    /// IMAP server hostname
    #[arg(short = 'H', long, default_value = "localhost")]
    pub host: String,

    /// IMAP server port (TLS)
    #[arg(short = 'P', long, default_value_t = 993)]
    pub port: u16,

    /// IMAP username
    #[arg(short, long, env = "IMAP_USER")]
    pub user: String,

    /// IMAP password
    #[arg(short, long, env = "IMAP_PASSWORD", hide_env_values = true)]
    pub pass: Option<String>,

    /// Forget previously processed messages for this run's mailboxes
    #[arg(short, long)]
    pub reset: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check messages with rspamd, flag them and move spam
    Scan(ScanArgs),
    /// Train rspamd with the messages of a mailbox
    Learn(LearnArgs),
}

#[derive(clap::Args, Debug)]
pub struct ScanArgs {
    /// Mailbox to scan
    #[arg(short, long, default_value = "INBOX")]
    pub inbox: String,

    /// Destination for spam; pass an empty value to leave spam in place
    #[arg(short, long, default_value = "Spam")]
    pub spambox: String,

    /// Destination for ham; ham stays in the inbox when unset
    #[arg(short = 'm', long)]
    pub hambox: Option<String>,

    /// Expunge moved messages from the inbox on close
    #[arg(short, long)]
    pub expunge: bool,

    /// Rescan messages that were already processed
    #[arg(short, long)]
    pub force: bool,

    /// IMAP SEARCH criteria
    #[arg(long, default_value = "ALL")]
    pub filter: String,
}

#[derive(clap::Args, Debug)]
pub struct LearnArgs {
    /// Label to train
    #[arg(value_enum)]
    pub label: Label,

    /// Mailbox whose messages are learned
    #[arg(short, long)]
    pub learnbox: String,

    /// Mark learned messages as seen
    #[arg(long)]
    pub mark_seen: bool,

    /// Relearn messages that were already processed
    #[arg(short, long)]
    pub force: bool,

    /// IMAP SEARCH criteria
    #[arg(long, default_value = "ALL")]
    pub filter: String,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Label {
    Ham,
    Spam,
}

impl From<Label> for TrainLabel {
    fn from(label: Label) -> Self {
        match label {
            Label::Ham => Self::Ham,
            Label::Spam => Self::Spam,
        }
    }
}

impl Cli {
    fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            pass: SecretString::from(self.pass.clone().unwrap_or_default()),
        }
    }

    pub fn scan_config(&self, args: &ScanArgs) -> ScanConfig {
        ScanConfig {
            connection: self.connection(),
            inbox: args.inbox.clone(),
            spam_box: non_empty(&args.spambox),
            ham_box: args.hambox.as_deref().and_then(non_empty),
            filter: args.filter.clone(),
            expunge: args.expunge,
            force: args.force,
            reset: self.reset,
        }
    }

    pub fn learn_config(&self, args: &LearnArgs) -> LearnConfig {
        LearnConfig {
            connection: self.connection(),
            learn_box: args.learnbox.clone(),
            label: args.label.into(),
            filter: args.filter.clone(),
            mark_seen: args.mark_seen,
            force: args.force,
            reset: self.reset,
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use secrecy::ExposeSecret;

    use super::{Cli, Command, Label};
    use crate::rspamd::TrainLabel;

    #[test]
    fn scan_defaults() {
        let cli = Cli::try_parse_from(["irspamd", "-u", "alice", "-p", "pw", "scan"])
            .expect("valid arguments");
        assert_eq!(cli.host, "localhost");
        assert_eq!(cli.port, 993);
        let Command::Scan(args) = &cli.command else {
            panic!("expected scan");
        };
        let config = cli.scan_config(args);
        assert_eq!(config.inbox, "INBOX");
        assert_eq!(config.spam_box.as_deref(), Some("Spam"));
        assert_eq!(config.ham_box, None);
        assert_eq!(config.filter, "ALL");
        assert_eq!(config.connection.pass.expose_secret(), "pw");
        assert!(!config.expunge && !config.force && !config.reset);
    }

    #[test]
    fn scan_with_all_switches() {
        let cli = Cli::try_parse_from([
            "irspamd", "-H", "imap.example.com", "-P", "1993", "-u", "alice", "-r", "scan", "-i",
            "Lists", "-s", "", "-m", "Ham", "-e", "-f", "--filter", "UNSEEN",
        ])
        .expect("valid arguments");
        let Command::Scan(args) = &cli.command else {
            panic!("expected scan");
        };
        let config = cli.scan_config(args);
        assert_eq!(config.connection.host, "imap.example.com");
        assert_eq!(config.connection.port, 1993);
        assert_eq!(config.inbox, "Lists");
        assert_eq!(config.spam_box, None);
        assert_eq!(config.ham_box.as_deref(), Some("Ham"));
        assert_eq!(config.filter, "UNSEEN");
        assert!(config.expunge && config.force && config.reset);
    }

    #[test]
    fn learn_requires_label_and_box() {
        let cli = Cli::try_parse_from([
            "irspamd", "-u", "alice", "learn", "spam", "-l", "Junk", "--mark-seen",
        ])
        .expect("valid arguments");
        let Command::Learn(args) = &cli.command else {
            panic!("expected learn");
        };
        assert_eq!(args.label, Label::Spam);
        let config = cli.learn_config(args);
        assert_eq!(config.label, TrainLabel::Spam);
        assert_eq!(config.learn_box, "Junk");
        assert!(config.mark_seen);

        assert!(Cli::try_parse_from(["irspamd", "-u", "alice", "learn", "spam"]).is_err());
        assert!(
            Cli::try_parse_from(["irspamd", "-u", "alice", "learn", "eggs", "-l", "Junk"]).is_err()
        );
    }
}
