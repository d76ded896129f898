//! AniDB HTTP API client
//!
//! HTTP calls are stateless and do not go through the UDP actor, but they
//! share the session guard: a ban from either side stops both, and AniDB's
//! `<error>Banned</error>` reply is recorded as an HTTP ban.

use crate::config::AniDbConfig;
use crate::protocol::error::ProtocolError;
use crate::protocol::guard::{BanOrigin, RateLimiter, SessionGuard};
use crate::protocol::outcome::HttpOutcome;
use async_trait::async_trait;
use log::{debug, warn};
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::{Client, StatusCode};
use std::sync::Arc;

/// CDN serving anime posters
pub const IMAGE_BASE_URL: &str = "https://cdn.anidb.net/images/main";

/// HTTP operations used by commands
#[async_trait]
pub trait HttpApi: Send + Sync {
    /// Full anime XML (`request=anime`)
    async fn fetch_anime(&self, anime_id: u32) -> HttpOutcome<String>;

    /// Raw bytes of an image or other resource
    async fn download(&self, url: &str) -> HttpOutcome<Vec<u8>>;
}

pub struct AniDbHttpClient {
    client: Client,
    base_url: String,
    client_name: String,
    client_version: u32,
    guard: Arc<SessionGuard>,
    spacing: RateLimiter,
}

impl AniDbHttpClient {
    pub fn new(config: &AniDbConfig, guard: Arc<SessionGuard>) -> Result<Self, ProtocolError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ProtocolError::http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.http_base_url.trim_end_matches('/').to_string(),
            client_name: config.client_name.clone(),
            client_version: config.client_version,
            guard,
            spacing: RateLimiter::new(config.http_spacing()),
        })
    }

    fn anime_url(&self, anime_id: u32) -> String {
        format!(
            "{}?request=anime&client={}&clientver={}&protover=1&aid={anime_id}",
            self.base_url, self.client_name, self.client_version
        )
    }

    fn banned(&self) -> Option<String> {
        let ban = self.guard.ban_state();
        ban.banned
            .then(|| ban.reason.unwrap_or_else(|| "banned".to_string()))
    }
}

#[async_trait]
impl HttpApi for AniDbHttpClient {
    async fn fetch_anime(&self, anime_id: u32) -> HttpOutcome<String> {
        if let Some(reason) = self.banned() {
            return HttpOutcome::Banned { reason };
        }

        self.spacing.wait_if_needed().await;
        debug!("Fetching AniDB anime {anime_id} over HTTP");
        let response = match self.client.get(self.anime_url(anime_id)).send().await {
            Ok(response) => response,
            Err(e) => return HttpOutcome::Error(ProtocolError::http(e.to_string())),
        };
        self.guard.record_http();

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return HttpOutcome::NotFound;
        }
        if !status.is_success() {
            warn!("AniDB HTTP request failed with status {status}");
            return HttpOutcome::Error(ProtocolError::http(format!("status {status}")));
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return HttpOutcome::Error(ProtocolError::http(e.to_string())),
        };
        classify_anime_body(&self.guard, body)
    }

    async fn download(&self, url: &str) -> HttpOutcome<Vec<u8>> {
        if let Some(reason) = self.banned() {
            return HttpOutcome::Banned { reason };
        }

        debug!("Downloading {url}");
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return HttpOutcome::Error(ProtocolError::http(e.to_string())),
        };

        match response.status() {
            StatusCode::NOT_FOUND => HttpOutcome::NotFound,
            status if status.is_success() => match response.bytes().await {
                Ok(bytes) => HttpOutcome::Success(bytes.to_vec()),
                Err(e) => HttpOutcome::Error(ProtocolError::http(e.to_string())),
            },
            status => HttpOutcome::Error(ProtocolError::http(format!("status {status}"))),
        }
    }
}

/// Map an anime XML body to an outcome, recording HTTP bans
fn classify_anime_body(guard: &SessionGuard, body: String) -> HttpOutcome<String> {
    match xml_element(&body, "error") {
        Some(error) if error.eq_ignore_ascii_case("banned") => {
            guard.set_banned(BanOrigin::Http, "<error>Banned</error>");
            HttpOutcome::Banned {
                reason: "<error>Banned</error>".to_string(),
            }
        }
        Some(error) if error.to_ascii_lowercase().contains("not found") => HttpOutcome::NotFound,
        Some(error) => HttpOutcome::Error(ProtocolError::http(error)),
        None => HttpOutcome::Success(body),
    }
}

/// Unescaped text of the first `<name>` element
///
/// Text of nested children is concatenated. Malformed documents yield `None`.
pub fn xml_element(xml: &str, name: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut text: Option<String> = None;
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                if text.is_some() {
                    depth += 1;
                } else if start.name().as_ref() == name.as_bytes() {
                    text = Some(String::new());
                }
            }
            Ok(Event::Empty(start))
                if text.is_none() && start.name().as_ref() == name.as_bytes() =>
            {
                return Some(String::new());
            }
            Ok(Event::Text(chunk)) => {
                if let Some(buf) = text.as_mut() {
                    buf.push_str(&chunk.unescape().ok()?);
                }
            }
            Ok(Event::CData(chunk)) => {
                if let Some(buf) = text.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&chunk));
                }
            }
            Ok(Event::End(_)) if text.is_some() => {
                if depth == 0 {
                    return text.map(|t| t.trim().to_string());
                }
                depth -= 1;
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Poster URL of an anime XML document
pub fn poster_url(xml: &str) -> Option<String> {
    xml_element(xml, "picture")
        .filter(|p| !p.is_empty())
        .map(|p| format!("{IMAGE_BASE_URL}/{p}"))
}
