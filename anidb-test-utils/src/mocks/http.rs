//! Mock AniDB HTTP API

use anidb_queue_core::protocol::{BanOrigin, HttpApi, HttpOutcome, ProtocolError, SessionGuard};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Scripted answer of the mock HTTP API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpReply {
    Xml(String),
    Bytes(Vec<u8>),
    NotFound,
    /// `<error>Banned</error>`; recorded on the guard when one is attached
    Banned,
    Error(String),
}

#[derive(Default)]
struct State {
    anime: HashMap<u32, HttpReply>,
    downloads: HashMap<String, HttpReply>,
    anime_calls: Vec<u32>,
    download_calls: Vec<String>,
}

/// Mock implementation of [`HttpApi`]
///
/// Unknown anime ids and URLs answer `NotFound`.
#[derive(Default)]
pub struct MockHttpApi {
    state: Mutex<State>,
    guard: Option<Arc<SessionGuard>>,
}

impl MockHttpApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `Banned` replies on `guard`, like the real client does
    pub fn with_guard(mut self, guard: Arc<SessionGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn set_anime(&self, anime_id: u32, reply: HttpReply) {
        self.state.lock().unwrap().anime.insert(anime_id, reply);
    }

    pub fn set_download(&self, url: &str, reply: HttpReply) {
        self.state
            .lock()
            .unwrap()
            .downloads
            .insert(url.to_string(), reply);
    }

    pub fn anime_calls(&self) -> Vec<u32> {
        self.state.lock().unwrap().anime_calls.clone()
    }

    pub fn download_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().download_calls.clone()
    }

    fn banned<T>(&self) -> HttpOutcome<T> {
        let reason = "<error>Banned</error>".to_string();
        if let Some(guard) = &self.guard {
            guard.set_banned(BanOrigin::Http, reason.clone());
        }
        HttpOutcome::Banned { reason }
    }

    fn blocked<T>(&self) -> Option<HttpOutcome<T>> {
        let ban = self.guard.as_ref()?.ban_state();
        ban.banned.then(|| HttpOutcome::Banned {
            reason: ban.reason.unwrap_or_else(|| "banned".to_string()),
        })
    }
}

#[async_trait]
impl HttpApi for MockHttpApi {
    async fn fetch_anime(&self, anime_id: u32) -> HttpOutcome<String> {
        if let Some(blocked) = self.blocked() {
            return blocked;
        }

        let reply = {
            let mut state = self.state.lock().unwrap();
            state.anime_calls.push(anime_id);
            state.anime.get(&anime_id).cloned()
        };

        match reply {
            Some(HttpReply::Xml(xml)) => HttpOutcome::Success(xml),
            Some(HttpReply::Bytes(bytes)) => {
                HttpOutcome::Success(String::from_utf8_lossy(&bytes).into_owned())
            }
            Some(HttpReply::Banned) => self.banned(),
            Some(HttpReply::Error(message)) => HttpOutcome::Error(ProtocolError::http(message)),
            Some(HttpReply::NotFound) | None => HttpOutcome::NotFound,
        }
    }

    async fn download(&self, url: &str) -> HttpOutcome<Vec<u8>> {
        if let Some(blocked) = self.blocked() {
            return blocked;
        }

        let reply = {
            let mut state = self.state.lock().unwrap();
            state.download_calls.push(url.to_string());
            state.downloads.get(url).cloned()
        };

        match reply {
            Some(HttpReply::Bytes(bytes)) => HttpOutcome::Success(bytes),
            Some(HttpReply::Xml(xml)) => HttpOutcome::Success(xml.into_bytes()),
            Some(HttpReply::Banned) => self.banned(),
            Some(HttpReply::Error(message)) => HttpOutcome::Error(ProtocolError::http(message)),
            Some(HttpReply::NotFound) | None => HttpOutcome::NotFound,
        }
    }
}
