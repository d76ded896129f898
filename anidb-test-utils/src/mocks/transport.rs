//! Scripted datagram transport standing in for the AniDB UDP server

use anidb_queue_core::protocol::{ProtocolError, Result, Transport};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::Instant;

/// How the mock server answers one datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `{code} {message}[\n{fields}]`, sent back prefixed with the request tag
    Text(String),
    /// Sent back verbatim, without a tag
    Raw(String),
    /// No answer at all; the client runs into its timeout
    Silence,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

/// One datagram received by the mock server
#[derive(Debug, Clone)]
pub struct SentDatagram {
    /// Command name, e.g. `AUTH` or `FILE`
    pub command: String,
    pub line: String,
    pub tag: Option<String>,
    pub at: Instant,
}

impl SentDatagram {
    /// Value of a `key=value` parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        let (_, params) = self.line.split_once(' ')?;
        params
            .split('&')
            .find_map(|part| part.strip_prefix(key)?.strip_prefix('='))
    }
}

#[derive(Default)]
struct State {
    scripted: HashMap<String, VecDeque<Reply>>,
    fallback: HashMap<String, Reply>,
    sent: Vec<SentDatagram>,
    pending: VecDeque<String>,
    awaiting_reply: bool,
    overlaps: usize,
    failing_sends: usize,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    inbox: Notify,
    sent: Notify,
}

/// In-process AniDB UDP server
///
/// Replies are looked up by command name: queued one-shot replies first,
/// then a sticky reply, then the built-in defaults (`AUTH` accepted,
/// `LOGOUT` and `PING` answered, anything else `598 UNKNOWN COMMAND`).
///
/// Clones share state, so a test keeps one clone for assertions and hands
/// the other to [`AniDbClient::spawn`](anidb_queue_core::protocol::AniDbClient::spawn).
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot reply for the next `command` datagram
    pub fn reply(&self, command: &str, reply: Reply) -> &Self {
        self.state()
            .scripted
            .entry(command.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Queue a one-shot text reply
    pub fn reply_text(&self, command: &str, text: &str) -> &Self {
        self.reply(command, Reply::text(text))
    }

    /// Answer every `command` datagram with `reply` once one-shots run out
    pub fn reply_always(&self, command: &str, reply: Reply) -> &Self {
        self.state().fallback.insert(command.to_string(), reply);
        self
    }

    /// Make the next `count` sends fail with an I/O error
    pub fn fail_sends(&self, count: usize) -> &Self {
        self.state().failing_sends = count;
        self
    }

    pub fn sent(&self) -> Vec<SentDatagram> {
        self.state().sent.clone()
    }

    pub fn sent_lines(&self) -> Vec<String> {
        self.state().sent.iter().map(|d| d.line.clone()).collect()
    }

    /// Number of datagrams received for `command`
    pub fn count(&self, command: &str) -> usize {
        self.state()
            .sent
            .iter()
            .filter(|d| d.command == command)
            .count()
    }

    /// Datagrams that arrived while an earlier one was still unanswered
    pub fn overlaps(&self) -> usize {
        self.state().overlaps
    }

    /// Wait until at least `count` datagrams for `command` have arrived
    pub async fn wait_for(&self, command: &str, count: usize) {
        loop {
            let notified = self.inner.sent.notified();
            if self.count(command) >= count {
                return;
            }
            notified.await;
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.state.lock().unwrap()
    }

    fn default_reply(command: &str) -> Reply {
        match command {
            "AUTH" => Reply::text("200 mocksess LOGIN ACCEPTED"),
            "LOGOUT" => Reply::text("203 LOGGED OUT"),
            "PING" => Reply::text("300 PONG"),
            _ => Reply::text("598 UNKNOWN COMMAND"),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, data: &[u8]) -> Result<()> {
        let line = String::from_utf8_lossy(data).into_owned();
        let command = line.split(' ').next().unwrap_or_default().to_string();
        let tag = line
            .rsplit(['&', ' '])
            .find_map(|p| p.strip_prefix("tag="))
            .map(str::to_string);

        {
            let mut state = self.state();
            if state.failing_sends > 0 {
                state.failing_sends -= 1;
                return Err(ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "mock send failure",
                )));
            }

            if state.awaiting_reply {
                state.overlaps += 1;
            }

            let reply = state
                .scripted
                .get_mut(&command)
                .and_then(VecDeque::pop_front)
                .or_else(|| state.fallback.get(&command).cloned())
                .unwrap_or_else(|| Self::default_reply(&command));

            match reply {
                Reply::Text(text) => {
                    let tag = tag.clone().unwrap_or_default();
                    state.pending.push_back(format!("{tag} {text}"));
                    state.awaiting_reply = true;
                }
                Reply::Raw(raw) => {
                    state.pending.push_back(raw);
                    state.awaiting_reply = true;
                }
                Reply::Silence => state.awaiting_reply = false,
            }

            state.sent.push(SentDatagram {
                command,
                line,
                tag,
                at: Instant::now(),
            });
        }

        self.inner.inbox.notify_one();
        self.inner.sent.notify_waiters();
        Ok(())
    }

    async fn recv(&self, buffer: &mut [u8]) -> Result<usize> {
        loop {
            let next = {
                let mut state = self.state();
                let next = state.pending.pop_front();
                if next.is_some() && state.pending.is_empty() {
                    state.awaiting_reply = false;
                }
                next
            };

            if let Some(reply) = next {
                let len = reply.len().min(buffer.len());
                buffer[..len].copy_from_slice(&reply.as_bytes()[..len]);
                return Ok(len);
            }
            self.inner.inbox.notified().await;
        }
    }
}
