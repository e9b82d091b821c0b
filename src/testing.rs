//! In-memory collaborators for pipeline tests

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use regex::Regex;

use crate::errors::{AppError, AppResult};
use crate::rspamd::{Classifier, TrainLabel};
use crate::transport::MailTransport;

/// Minimal RFC822 message whose body is `tag`
pub fn message(tag: &str) -> Vec<u8> {
    format!("From: test@example.com\r\nSubject: {tag}\r\n\r\n{tag}").into_bytes()
}

struct StoredMessage {
    body: Vec<u8>,
    flags: BTreeSet<String>,
}

/// Single-mailbox transport recording every mutation
pub struct FakeMailbox {
    name: String,
    messages: BTreeMap<u32, StoredMessage>,
    failing_read: Option<u32>,
    moves: Vec<(u32, String)>,
    seen_reads: Vec<u32>,
    mutations: usize,
    closed_with: Option<bool>,
}

impl FakeMailbox {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            messages: BTreeMap::new(),
            failing_read: None,
            moves: Vec::new(),
            seen_reads: Vec::new(),
            mutations: 0,
            closed_with: None,
        }
    }

    pub fn with_message(mut self, uid: u32, body: Vec<u8>) -> Self {
        self.messages.insert(
            uid,
            StoredMessage {
                body,
                flags: BTreeSet::new(),
            },
        );
        self
    }

    pub fn with_flag(mut self, uid: u32, flag: &str) -> Self {
        if let Some(message) = self.messages.get_mut(&uid) {
            message.flags.insert(flag.to_owned());
        }
        self
    }

    /// Make reading `uid` fail with a transport error
    pub fn failing_read(mut self, uid: u32) -> Self {
        self.failing_read = Some(uid);
        self
    }

    pub fn flags(&self, uid: u32) -> BTreeSet<String> {
        self.messages
            .get(&uid)
            .map(|m| m.flags.clone())
            .unwrap_or_default()
    }

    pub fn moves(&self) -> Vec<(u32, String)> {
        self.moves.clone()
    }

    /// UIDs read with `mark_seen`
    pub fn seen_reads(&self) -> Vec<u32> {
        self.seen_reads.clone()
    }

    /// Flag and move operations applied so far
    pub fn mutation_count(&self) -> usize {
        self.mutations
    }

    /// `Some(expunge)` once the session was closed
    pub fn closed_with(&self) -> Option<bool> {
        self.closed_with
    }

    fn message_mut(&mut self, uid: u32) -> AppResult<&mut StoredMessage> {
        self.messages
            .get_mut(&uid)
            .ok_or_else(|| AppError::NotFound(format!("message {uid}")))
    }
}

#[async_trait]
impl MailTransport for FakeMailbox {
    async fn list_messages(&mut self, mailbox: &str, _filter: &str) -> AppResult<Vec<u32>> {
        if mailbox != self.name {
            return Err(AppError::NotFound(format!("mailbox '{mailbox}'")));
        }
        Ok(self.messages.keys().copied().collect())
    }

    async fn read_body(&mut self, uid: u32, mark_seen: bool) -> AppResult<Vec<u8>> {
        if self.failing_read == Some(uid) {
            return Err(AppError::Transport("connection reset".to_owned()));
        }
        if mark_seen {
            self.seen_reads.push(uid);
        }
        Ok(self.message_mut(uid)?.body.clone())
    }

    async fn set_flag(&mut self, uid: u32, name: &str, on: bool) -> AppResult<()> {
        let message = self.message_mut(uid)?;
        if on {
            message.flags.insert(name.to_owned());
        } else {
            message.flags.remove(name);
        }
        self.mutations += 1;
        Ok(())
    }

    async fn clear_flags_matching(&mut self, uid: u32, pattern: &Regex) -> AppResult<()> {
        self.message_mut(uid)?
            .flags
            .retain(|flag| !pattern.is_match(flag));
        self.mutations += 1;
        Ok(())
    }

    async fn move_to(&mut self, uid: u32, mailbox: &str) -> AppResult<()> {
        self.message_mut(uid)?;
        self.moves.push((uid, mailbox.to_owned()));
        self.mutations += 1;
        Ok(())
    }

    async fn close(&mut self, expunge: bool) -> AppResult<()> {
        self.closed_with = Some(expunge);
        Ok(())
    }
}

/// Canned classifier response
#[derive(Clone)]
pub enum Reply {
    Lines(Vec<String>),
    /// Invocation failure, surfaced as `AppError::Classifier`
    Fail(&'static str),
}

/// Classifier answering by message body
///
/// Bodies without a canned reply fail with a classifier error.
pub struct FakeClassifier {
    replies: HashMap<Vec<u8>, Reply>,
    classified: Mutex<usize>,
    trained: Mutex<Vec<TrainLabel>>,
}

impl FakeClassifier {
    pub fn new() -> Self {
        Self {
            replies: HashMap::new(),
            classified: Mutex::new(0),
            trained: Mutex::new(Vec::new()),
        }
    }

    /// Answer messages built with [`message`]`(tag)`
    pub fn reply_to(mut self, tag: &str, reply: Reply) -> Self {
        self.replies.insert(message(tag), reply);
        self
    }

    pub fn classify_calls(&self) -> usize {
        *self.classified.lock().expect("lock")
    }

    pub fn trained(&self) -> Vec<TrainLabel> {
        self.trained.lock().expect("lock").clone()
    }

    fn answer(&self, body: &[u8]) -> AppResult<Vec<String>> {
        match self.replies.get(body) {
            Some(Reply::Lines(lines)) => Ok(lines.clone()),
            Some(Reply::Fail(msg)) => Err(AppError::Classifier((*msg).to_owned())),
            None => Err(AppError::Classifier("no canned reply".to_owned())),
        }
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, body: &[u8]) -> AppResult<Vec<String>> {
        *self.classified.lock().expect("lock") += 1;
        self.answer(body)
    }

    async fn train(&self, label: TrainLabel, body: &[u8]) -> AppResult<Vec<String>> {
        self.trained.lock().expect("lock").push(label);
        self.answer(body)
    }
}
