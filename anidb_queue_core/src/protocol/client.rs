//! AniDB UDP client
//!
//! A single actor task owns the transport and the session key. Every call on
//! an [`AniDbClient`] handle is a message to that task, so at most one UDP
//! exchange is ever in flight no matter how many queues share the handle.

use crate::config::AniDbConfig;
use crate::protocol::error::{ProtocolError, Result};
use crate::protocol::guard::{BanOrigin, KeepAliveAction, SendKind, SessionGuard};
use crate::protocol::messages::auth::AuthReply;
use crate::protocol::messages::{AuthRequest, UdpRequest, UdpResponse};
use crate::protocol::outcome::UdpOutcome;
use crate::protocol::transport::Transport;
use crate::security::SecureString;
use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, timeout_at};

/// Protocol client settings
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub client_name: String,
    pub client_version: u32,
    pub request_timeout: Duration,
    pub nat: bool,
    pub credentials: Option<(String, SecureString)>,
}

impl ClientSettings {
    pub fn from_config(config: &AniDbConfig) -> Self {
        Self {
            client_name: config.client_name.clone(),
            client_version: config.client_version,
            request_timeout: config.request_timeout(),
            nat: config.nat,
            credentials: config.credentials(),
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from_config(&AniDbConfig::default())
    }
}

/// Observable session state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub logged_in: bool,
    /// The server rejected the last session; the next call logs in again
    pub is_invalid_session: bool,
    pub logged_in_at: Option<DateTime<Utc>>,
    /// The actor has shut down
    pub closed: bool,
}

enum Request {
    Login(oneshot::Sender<Result<()>>),
    Logout(oneshot::Sender<Result<()>>),
    Ping(oneshot::Sender<Result<()>>),
    Send(UdpRequest, oneshot::Sender<UdpOutcome>),
    Tick(oneshot::Sender<KeepAliveAction>),
    Close(oneshot::Sender<()>),
}

/// Cloneable handle to the protocol actor
#[derive(Clone)]
pub struct AniDbClient {
    tx: mpsc::Sender<Request>,
    guard: Arc<SessionGuard>,
    state: watch::Receiver<SessionState>,
}

impl AniDbClient {
    /// Start the actor on the current tokio runtime
    pub fn spawn(
        transport: impl Transport + 'static,
        guard: Arc<SessionGuard>,
        settings: ClientSettings,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let (state_tx, state) = watch::channel(SessionState::default());

        let actor = ClientActor {
            transport: Box::new(transport),
            guard: guard.clone(),
            settings,
            session: None,
            state: state_tx,
            next_tag: 0,
            buffer: vec![0u8; crate::protocol::MAX_PACKET_SIZE],
        };
        tokio::spawn(actor.run(rx));

        Self { tx, guard, state }
    }

    pub fn guard(&self) -> &Arc<SessionGuard> {
        &self.guard
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Log in unless a session already exists
    pub async fn login(&self) -> Result<()> {
        self.call(Request::Login)
            .await
            .unwrap_or(Err(ProtocolError::ClientClosed))
    }

    pub async fn logout(&self) -> Result<()> {
        self.call(Request::Logout)
            .await
            .unwrap_or(Err(ProtocolError::ClientClosed))
    }

    pub async fn ping(&self) -> Result<()> {
        self.call(Request::Ping)
            .await
            .unwrap_or(Err(ProtocolError::ClientClosed))
    }

    /// Send one command and classify the reply
    pub async fn send(&self, request: UdpRequest) -> UdpOutcome {
        self.call(|reply| Request::Send(request, reply))
            .await
            .unwrap_or(UdpOutcome::Error(ProtocolError::ClientClosed))
    }

    /// Run one keep-alive decision and act on it
    pub async fn tick(&self) -> KeepAliveAction {
        self.call(Request::Tick)
            .await
            .unwrap_or(KeepAliveAction::Idle)
    }

    /// Log out (when possible) and stop the actor
    pub async fn close(&self) {
        let _ = self.call(Request::Close).await;
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.ok()?;
        rx.await.ok()
    }
}

impl std::fmt::Debug for AniDbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AniDbClient")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct ClientActor {
    transport: Box<dyn Transport>,
    guard: Arc<SessionGuard>,
    settings: ClientSettings,
    session: Option<String>,
    state: watch::Sender<SessionState>,
    next_tag: u32,
    buffer: Vec<u8>,
}

impl ClientActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Request>) {
        while let Some(request) = rx.recv().await {
            match request {
                Request::Login(reply) => {
                    let _ = reply.send(self.login().await);
                }
                Request::Logout(reply) => {
                    let _ = reply.send(self.logout().await);
                }
                Request::Ping(reply) => {
                    let _ = reply.send(self.ping().await);
                }
                Request::Send(request, reply) => {
                    let _ = reply.send(self.send(request).await);
                }
                Request::Tick(reply) => {
                    let _ = reply.send(self.tick().await);
                }
                Request::Close(reply) => {
                    if let Err(e) = self.logout().await {
                        warn!("Logout during shutdown failed: {e}");
                    }
                    let _ = reply.send(());
                    break;
                }
            }
        }

        debug!("AniDB client actor stopped");
        self.state.send_modify(|state| {
            state.logged_in = false;
            state.closed = true;
        });
    }

    fn tag(&mut self) -> String {
        self.next_tag = self.next_tag.wrapping_add(1);
        format!("t{}", self.next_tag)
    }

    /// Refuse traffic while banned or backing off
    fn check_blocked(&self) -> Result<()> {
        let ban = self.guard.ban_state();
        if ban.banned {
            return Err(ProtocolError::banned(
                ban.reason.unwrap_or_else(|| "banned".to_string()),
            ));
        }
        if let Some(pause) = self.guard.extended_pause() {
            return Err(ProtocolError::backing_off(pause.until, pause.reason));
        }
        Ok(())
    }

    /// One datagram out, one correlated datagram back
    async fn exchange(&mut self, request: &UdpRequest, kind: SendKind) -> Result<UdpResponse> {
        self.guard.wait_for_send_slot().await;

        let tag = self.tag();
        let session = self.session.as_deref();
        let encoded = request.encode(session, &tag);
        debug!("-> {}", request.masked(session, &tag));

        self.transport.send(encoded.as_bytes()).await?;
        self.guard.record_sent(kind);

        let deadline = Instant::now() + self.settings.request_timeout;
        loop {
            let size = match timeout_at(deadline, self.transport.recv(&mut self.buffer)).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(
                        "{} timed out after {:?}",
                        request.name(),
                        self.settings.request_timeout
                    );
                    return Err(ProtocolError::Timeout(self.settings.request_timeout));
                }
            };

            let raw = String::from_utf8_lossy(&self.buffer[..size]);
            let response = match UdpResponse::parse(&raw) {
                Ok(response) => response,
                Err(e) => {
                    warn!("Discarding malformed datagram: {e}");
                    continue;
                }
            };

            if !response.matches(&tag) {
                debug!(
                    "Discarding stale reply {:?} while waiting for {tag}",
                    response.tag
                );
                continue;
            }

            self.guard.record_received(kind);
            if request.name() == "AUTH" {
                debug!("<- {} (AUTH)", response.code);
            } else {
                debug!("<- {} {}", response.code, response.message);
            }
            trace!("reply fields: {:?}", response.fields);
            return Ok(response);
        }
    }

    fn set_session(&mut self, session: Option<String>, invalid: bool) {
        let logged_in = session.is_some();
        self.session = session;
        let now = self.guard.now();
        self.state.send_modify(|state| {
            state.logged_in = logged_in;
            state.is_invalid_session = invalid;
            state.logged_in_at = logged_in.then_some(now);
        });
    }

    async fn login(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        self.check_blocked()?;

        let (user, pass) = self.settings.credentials.clone().ok_or_else(|| {
            ProtocolError::authentication_failed("no AniDB credentials configured")
        })?;
        let auth = AuthRequest::new(
            user,
            pass,
            self.settings.client_name.clone(),
            self.settings.client_version,
        )
        .with_nat(self.settings.nat);
        auth.validate()?;

        info!("Logging in to AniDB");
        let response = self.exchange(&auth.to_request(), SendKind::Command).await?;
        let code = response.response_code();

        match code.0 {
            200 | 201 => {
                let reply = AuthReply::parse(&response)?;
                if reply.new_version_available {
                    warn!("AniDB reports a newer client version is available");
                }
                self.set_session(Some(reply.session), false);
                info!("Logged in to AniDB");
                Ok(())
            }
            _ if code.is_banned() => {
                let reason = format!("{} {}", code.0, response.message);
                self.guard.set_banned(BanOrigin::Udp, reason.clone());
                Err(ProtocolError::banned(reason))
            }
            _ if code.is_server_busy() => {
                self.guard.extend_pause_for_server_busy(code.to_string());
                Err(ProtocolError::server_error(code.0, response.message))
            }
            _ => {
                warn!("AniDB login rejected: {code}");
                Err(ProtocolError::authentication_failed(code.to_string()))
            }
        }
    }

    async fn logout(&mut self) -> Result<()> {
        if self.session.is_none() {
            return Ok(());
        }
        if self.check_blocked().is_err() {
            debug!("Dropping AniDB session locally, traffic is blocked");
            self.set_session(None, false);
            return Ok(());
        }

        let result = self.exchange(&UdpRequest::logout(), SendKind::Command).await;
        self.set_session(None, false);
        let response = result?;
        info!("Logged out of AniDB ({})", response.response_code());
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        self.check_blocked()?;
        let request = UdpRequest::ping(self.settings.nat);
        let response = self.exchange(&request, SendKind::KeepAlive).await?;
        match response.code {
            300 => Ok(()),
            code => Err(ProtocolError::server_error(code, response.message)),
        }
    }

    async fn send(&mut self, request: UdpRequest) -> UdpOutcome {
        if let Err(e) = self.check_blocked() {
            return blocked_outcome(e);
        }

        if request.requires_auth() && self.session.is_none() {
            debug!("{} needs a session, logging in first", request.name());
            if let Err(e) = self.login().await {
                return blocked_outcome(e);
            }
        }

        match self.exchange(&request, SendKind::Command).await {
            Ok(response) => self.classify(response),
            Err(ProtocolError::Timeout(_)) => UdpOutcome::Timeout,
            Err(e) => UdpOutcome::Error(e),
        }
    }

    fn classify(&mut self, response: UdpResponse) -> UdpOutcome {
        let code = response.response_code();

        if code.is_invalid_session() {
            warn!("AniDB rejected the session ({code}), will log in again on next call");
            self.set_session(None, true);
            UdpOutcome::InvalidSession
        } else if code.is_banned() {
            let reason = format!("{} {}", code.0, response.message);
            self.guard.set_banned(BanOrigin::Udp, reason.clone());
            UdpOutcome::Banned { reason }
        } else if code.is_server_busy() {
            self.guard.extend_pause_for_server_busy(code.to_string());
            UdpOutcome::Error(ProtocolError::server_error(code.0, response.message))
        } else if code.is_no_such_entity() {
            UdpOutcome::NoSuchEntity(response)
        } else if code.is_success() {
            UdpOutcome::Success(response)
        } else {
            UdpOutcome::Error(ProtocolError::server_error(code.0, response.message))
        }
    }

    async fn tick(&mut self) -> KeepAliveAction {
        let action = self.guard.keepalive_action(self.session.is_some(), false);
        match action {
            KeepAliveAction::Idle => {}
            KeepAliveAction::ExpireBan => {
                self.guard.expire_ban();
            }
            KeepAliveAction::ResetExtendPause => self.guard.reset_extend_pause(),
            KeepAliveAction::ForceLogout => {
                info!("No AniDB commands for a while, logging out");
                if let Err(e) = self.logout().await {
                    warn!("Forced logout failed: {e}");
                }
            }
            KeepAliveAction::Ping => {
                if let Err(e) = self.ping().await {
                    warn!("Keep-alive ping failed: {e}");
                }
            }
        }
        action
    }
}

fn blocked_outcome(error: ProtocolError) -> UdpOutcome {
    match error {
        ProtocolError::Banned { reason } => UdpOutcome::Banned { reason },
        ProtocolError::Timeout(_) => UdpOutcome::Timeout,
        other => UdpOutcome::Error(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::protocol::guard::GuardSettings;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replies to each datagram with the next scripted line, echoing its tag
    #[derive(Clone, Default)]
    struct Scripted {
        replies: Arc<Mutex<VecDeque<String>>>,
        sent: Arc<Mutex<Vec<String>>>,
        pending: Arc<Mutex<VecDeque<String>>>,
        notify: Arc<tokio::sync::Notify>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            let script = Self::default();
            script
                .replies
                .lock()
                .unwrap()
                .extend(replies.iter().map(|r| r.to_string()));
            script
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, data: &[u8]) -> Result<()> {
            let line = String::from_utf8_lossy(data).into_owned();
            let tag = line
                .rsplit(['&', ' '])
                .find_map(|p| p.strip_prefix("tag="))
                .unwrap_or_default()
                .to_string();
            self.sent.lock().unwrap().push(line);
            if let Some(reply) = self.replies.lock().unwrap().pop_front() {
                if !reply.is_empty() {
                    self.pending.lock().unwrap().push_back(format!("{tag} {reply}"));
                }
            }
            self.notify.notify_one();
            Ok(())
        }

        async fn recv(&self, buffer: &mut [u8]) -> Result<usize> {
            loop {
                let next = self.pending.lock().unwrap().pop_front();
                if let Some(reply) = next {
                    buffer[..reply.len()].copy_from_slice(reply.as_bytes());
                    return Ok(reply.len());
                }
                self.notify.notified().await;
            }
        }
    }

    fn client(script: &Scripted) -> AniDbClient {
        client_with_nat(script, false)
    }

    fn client_with_nat(script: &Scripted, nat: bool) -> AniDbClient {
        let settings = GuardSettings {
            min_send_spacing: Duration::ZERO,
            ..GuardSettings::default()
        };
        let guard = Arc::new(SessionGuard::new(settings, Arc::new(SystemClock)));
        AniDbClient::spawn(
            script.clone(),
            guard,
            ClientSettings {
                credentials: Some(("alice".to_string(), SecureString::new("hunter2"))),
                request_timeout: Duration::from_millis(200),
                nat,
                ..ClientSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn test_send_logs_in_first_and_injects_session() {
        let script = Scripted::new(&["200 sEsS1 LOGIN ACCEPTED", "250 GROUP\n7091|850"]);
        let client = client(&script);

        let outcome = client.send(UdpRequest::group(7091)).await;
        assert!(outcome.is_success());
        assert!(client.state().logged_in);

        let sent = script.sent();
        assert!(sent[0].starts_with("AUTH user=alice&pass=hunter2"));
        assert_eq!(sent[1], "GROUP gid=7091&s=sEsS1&tag=t2");
    }

    #[tokio::test]
    async fn test_invalid_session_drops_session() {
        let script = Scripted::new(&[
            "200 sEsS1 LOGIN ACCEPTED",
            "506 INVALID SESSION",
            "200 sEsS2 LOGIN ACCEPTED",
            "250 GROUP\n1|2",
        ]);
        let client = client(&script);

        assert!(matches!(
            client.send(UdpRequest::group(1)).await,
            UdpOutcome::InvalidSession
        ));
        let state = client.state();
        assert!(!state.logged_in);
        assert!(state.is_invalid_session);

        assert!(client.send(UdpRequest::group(1)).await.is_success());
        let auths = script.sent().iter().filter(|s| s.starts_with("AUTH")).count();
        assert_eq!(auths, 2);
        assert!(!client.state().is_invalid_session);
    }

    #[tokio::test]
    async fn test_ban_reply_sets_ban_and_blocks_traffic() {
        let script = Scripted::new(&["200 sEsS1 LOGIN ACCEPTED", "555 BANNED - flooding"]);
        let client = client(&script);

        let outcome = client.send(UdpRequest::group(1)).await;
        assert!(matches!(outcome, UdpOutcome::Banned { .. }));
        assert!(client.guard().is_banned());

        let outcome = client.send(UdpRequest::group(2)).await;
        assert!(matches!(outcome, UdpOutcome::Banned { .. }));
        assert_eq!(script.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_login_is_not_retried() {
        let script = Scripted::new(&["500 LOGIN FAILED"]);
        let client = client(&script);

        let outcome = client.send(UdpRequest::group(1)).await;
        assert!(matches!(
            outcome,
            UdpOutcome::Error(ProtocolError::AuthenticationFailed { .. })
        ));
        assert_eq!(script.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_server_busy_starts_back_off() {
        let script = Scripted::new(&["200 sEsS1 LOGIN ACCEPTED", "602 SERVER BUSY"]);
        let client = client(&script);

        let outcome = client.send(UdpRequest::group(1)).await;
        match outcome {
            UdpOutcome::Error(e) => assert!(e.is_transient()),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(client.guard().extended_pause().is_some());
        assert!(matches!(
            client.send(UdpRequest::group(1)).await,
            UdpOutcome::Error(ProtocolError::BackingOff { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_reply_times_out() {
        let script = Scripted::new(&["200 sEsS1 LOGIN ACCEPTED", ""]);
        let client = client(&script);
        assert!(matches!(
            client.send(UdpRequest::group(1)).await,
            UdpOutcome::Timeout
        ));
    }

    #[tokio::test]
    async fn test_no_such_entity() {
        let script = Scripted::new(&["200 sEsS1 LOGIN ACCEPTED", "320 NO SUCH FILE"]);
        let client = client(&script);
        assert!(matches!(
            client.send(UdpRequest::file(1, "abc")).await,
            UdpOutcome::NoSuchEntity(_)
        ));
    }

    #[tokio::test]
    async fn test_ping_requests_nat_port_only_when_enabled() {
        let script = Scripted::new(&["300 PONG"]);
        client(&script).ping().await.unwrap();
        assert_eq!(script.sent(), vec!["PING tag=t1".to_string()]);

        let script = Scripted::new(&["300 PONG\n54321"]);
        client_with_nat(&script, true).ping().await.unwrap();
        assert_eq!(script.sent(), vec!["PING nat=1&tag=t1".to_string()]);
    }

    #[tokio::test]
    async fn test_close_logs_out_and_stops() {
        let script = Scripted::new(&["200 sEsS1 LOGIN ACCEPTED", "203 LOGGED OUT"]);
        let client = client(&script);
        client.login().await.unwrap();

        client.close().await;
        assert!(script.sent()[1].starts_with("LOGOUT s=sEsS1"));
        assert!(matches!(
            client.send(UdpRequest::group(1)).await,
            UdpOutcome::Error(ProtocolError::ClientClosed)
        ));
        assert!(client.state().closed);
    }
}
