//! Session guard: send spacing, ban state and server back-off
//!
//! Every AniDB request, UDP or HTTP, consults the guard first. Each timestamp
//! category sits behind its own lock so the keep-alive tick and foreground
//! commands never race on a read-modify-write. Ban changes are published on a
//! `watch` channel that queue processors observe.

use crate::clock::{SharedClock, chrono_duration};
use crate::config::{AniDbConfig, SessionConfig};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, sleep};

/// Who detected (or lifted) a ban
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BanOrigin {
    Udp,
    Http,
    Manual,
}

/// Current ban state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanState {
    pub banned: bool,
    pub origin: Option<BanOrigin>,
    pub reason: Option<String>,
    /// When the ban was (last) reported
    pub since: Option<DateTime<Utc>>,
}

/// A server-requested back-off window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedPause {
    pub until: DateTime<Utc>,
    pub reason: String,
}

/// Guard state a queue processor waits on
#[derive(Debug, Clone)]
pub struct SessionSignals {
    pub ban: watch::Receiver<BanState>,
    pub pause: watch::Receiver<Option<ExtendedPause>>,
}

/// What is about to be sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendKind {
    /// Keep-alive PING, subject to the ping interval
    KeepAlive,
    /// Any command; only ban and back-off apply
    Command,
}

/// Decision of one keep-alive tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeepAliveAction {
    Idle,
    Ping,
    ForceLogout,
    ExpireBan,
    ResetExtendPause,
}

/// Timing rules of the guard
#[derive(Debug, Clone)]
pub struct GuardSettings {
    pub min_send_spacing: Duration,
    pub ping_interval: ChronoDuration,
    pub force_logout_after: ChronoDuration,
    /// `None` disables automatic ban expiry
    pub ban_reset_after: Option<ChronoDuration>,
    pub server_busy_pause: Duration,
}

impl GuardSettings {
    pub fn from_config(anidb: &AniDbConfig, session: &SessionConfig) -> Self {
        Self {
            min_send_spacing: anidb.min_send_spacing(),
            ping_interval: ChronoDuration::seconds(session.ping_interval_secs as i64),
            force_logout_after: ChronoDuration::seconds(session.force_logout_after_secs as i64),
            ban_reset_after: (session.ban_reset_after_secs > 0)
                .then(|| ChronoDuration::seconds(session.ban_reset_after_secs as i64)),
            server_busy_pause: Duration::from_secs(session.server_busy_pause_secs),
        }
    }
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self::from_config(&AniDbConfig::default(), &SessionConfig::default())
    }
}

/// Serializable view of the guard for status output
#[derive(Debug, Clone, Serialize)]
pub struct GuardSnapshot {
    pub ban: BanState,
    pub extended_pause: Option<ExtendedPause>,
    pub last_message: Option<DateTime<Utc>>,
    pub last_udp_message: Option<DateTime<Utc>>,
    pub last_non_ping_message: Option<DateTime<Utc>>,
    pub last_ping: Option<DateTime<Utc>>,
}

/// Minimum spacing between wire sends
pub(crate) struct RateLimiter {
    last_send: tokio::sync::Mutex<Option<Instant>>,
    min_delay: Duration,
}

impl RateLimiter {
    pub(crate) fn new(min_delay: Duration) -> Self {
        Self {
            last_send: tokio::sync::Mutex::new(None),
            min_delay,
        }
    }

    fn remaining(&self) -> Duration {
        match self.last_send.try_lock() {
            Ok(last) => last
                .map(|t| self.min_delay.saturating_sub(t.elapsed()))
                .unwrap_or_default(),
            // Somebody is already waiting for the slot
            Err(_) => self.min_delay,
        }
    }

    pub(crate) async fn wait_if_needed(&self) {
        let mut last = self.last_send.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                debug!("Rate limiter: waiting {wait_time:?} to respect send spacing");
                sleep(wait_time).await;
            } else {
                trace!("Rate limiter: last send was {elapsed:?} ago, no wait needed");
            }
        }

        *last = Some(Instant::now());
    }
}

type Stamp = Mutex<Option<DateTime<Utc>>>;

fn read(stamp: &Stamp) -> Option<DateTime<Utc>> {
    *stamp.lock().unwrap_or_else(|e| e.into_inner())
}

fn write(stamp: &Stamp, at: DateTime<Utc>) {
    *stamp.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
}

pub struct SessionGuard {
    clock: SharedClock,
    settings: GuardSettings,
    last_message: Stamp,
    last_udp_message: Stamp,
    last_non_ping_message: Stamp,
    last_ping: Stamp,
    pause: watch::Sender<Option<ExtendedPause>>,
    ban: watch::Sender<BanState>,
    spacing: RateLimiter,
}

impl SessionGuard {
    pub fn new(settings: GuardSettings, clock: SharedClock) -> Self {
        let (ban, _) = watch::channel(BanState::default());
        let (pause, _) = watch::channel(None);
        Self {
            clock,
            spacing: RateLimiter::new(settings.min_send_spacing),
            settings,
            last_message: Mutex::new(None),
            last_udp_message: Mutex::new(None),
            last_non_ping_message: Mutex::new(None),
            last_ping: Mutex::new(None),
            pause,
            ban,
        }
    }

    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// True iff not banned, not backing off, and (for keep-alives) the ping
    /// interval has passed since the last UDP message
    pub fn can_send(&self, kind: SendKind) -> bool {
        let now = self.clock.now();
        if self.is_banned() || self.active_pause(now).is_some() {
            return false;
        }
        match kind {
            SendKind::Command => true,
            SendKind::KeepAlive => self.keepalive_due(now),
        }
    }

    /// Time left until the next datagram may go out
    pub fn send_delay(&self) -> Duration {
        self.spacing.remaining()
    }

    /// Wait for the send spacing and claim the slot
    pub async fn wait_for_send_slot(&self) {
        self.spacing.wait_if_needed().await;
    }

    pub fn record_sent(&self, kind: SendKind) {
        self.record_udp(kind);
    }

    pub fn record_received(&self, kind: SendKind) {
        self.record_udp(kind);
    }

    fn record_udp(&self, kind: SendKind) {
        let now = self.clock.now();
        write(&self.last_message, now);
        write(&self.last_udp_message, now);
        match kind {
            SendKind::KeepAlive => write(&self.last_ping, now),
            SendKind::Command => write(&self.last_non_ping_message, now),
        }
    }

    /// HTTP calls count as AniDB traffic but not as UDP messages
    pub fn record_http(&self) {
        write(&self.last_message, self.clock.now());
    }

    pub fn ban_state(&self) -> BanState {
        self.ban.borrow().clone()
    }

    pub fn is_banned(&self) -> bool {
        self.ban.borrow().banned
    }

    /// Observe ban changes
    pub fn subscribe_ban(&self) -> watch::Receiver<BanState> {
        self.ban.subscribe()
    }

    /// Observe ban and back-off changes
    pub fn subscribe(&self) -> SessionSignals {
        SessionSignals {
            ban: self.ban.subscribe(),
            pause: self.pause.subscribe(),
        }
    }

    /// Enter (or extend) the ban
    ///
    /// Repeated calls keep the ban and restart its clock.
    pub fn set_banned(&self, origin: BanOrigin, reason: impl Into<String>) {
        let reason = reason.into();
        let now = self.clock.now();
        let was_banned = self.is_banned();

        self.ban.send_replace(BanState {
            banned: true,
            origin: Some(origin),
            reason: Some(reason.clone()),
            since: Some(now),
        });

        if was_banned {
            warn!("AniDB ban extended ({origin:?}): {reason}");
        } else {
            warn!("AniDB ban detected ({origin:?}): {reason}; all AniDB traffic is on hold");
        }
    }

    /// Manual unban; returns whether a ban was lifted
    pub fn unban(&self, reason: &str) -> bool {
        self.clear_ban(BanOrigin::Manual, reason)
    }

    /// Lift the ban once `ban_reset_after` has elapsed
    pub fn expire_ban(&self) -> bool {
        let ban = self.ban_state();
        if !self.ban_expired(&ban, self.clock.now()) {
            return false;
        }
        self.clear_ban(BanOrigin::Manual, "ban reset period elapsed")
    }

    /// Restore a persisted ban without logging it as new
    pub fn restore_ban(&self, state: BanState) {
        if state.banned {
            info!(
                "Restoring AniDB ban from {:?}: {}",
                state.since,
                state.reason.as_deref().unwrap_or("unknown reason")
            );
        }
        self.ban.send_replace(state);
    }

    fn clear_ban(&self, origin: BanOrigin, reason: &str) -> bool {
        if !self.is_banned() {
            return false;
        }
        self.ban.send_replace(BanState {
            banned: false,
            origin: Some(origin),
            reason: Some(reason.to_string()),
            since: None,
        });
        info!("AniDB ban lifted: {reason}");
        true
    }

    fn ban_expired(&self, ban: &BanState, now: DateTime<Utc>) -> bool {
        match (ban.banned, ban.since, self.settings.ban_reset_after) {
            (true, Some(since), Some(reset_after)) => now - since >= reset_after,
            _ => false,
        }
    }

    /// Hold off all traffic for `duration`
    pub fn extend_pause(&self, duration: Duration, reason: impl Into<String>) {
        let until = self.clock.now() + chrono_duration(duration);
        let reason = reason.into();
        warn!("AniDB asked us to back off until {until}: {reason}");
        self.pause.send_replace(Some(ExtendedPause { until, reason }));
    }

    /// Back off for the configured server-busy window
    pub fn extend_pause_for_server_busy(&self, reason: impl Into<String>) {
        self.extend_pause(self.settings.server_busy_pause, reason);
    }

    pub fn reset_extend_pause(&self) {
        if self.pause.send_replace(None).is_some() {
            info!("AniDB back-off window cleared");
        }
    }

    /// The back-off window, if it is still in force
    pub fn extended_pause(&self) -> Option<ExtendedPause> {
        self.active_pause(self.clock.now())
    }

    fn active_pause(&self, now: DateTime<Utc>) -> Option<ExtendedPause> {
        self.pause.borrow().clone().filter(|p| p.until > now)
    }

    fn keepalive_due(&self, now: DateTime<Utc>) -> bool {
        read(&self.last_udp_message).is_none_or(|last| now - last >= self.settings.ping_interval)
    }

    /// Decide what the keep-alive tick should do
    pub fn keepalive_action(&self, logged_in: bool, awaiting_response: bool) -> KeepAliveAction {
        let now = self.clock.now();
        let ban = self.ban_state();

        if self.ban_expired(&ban, now) {
            return KeepAliveAction::ExpireBan;
        }

        let pause = self.pause.borrow().clone();
        if pause.as_ref().is_some_and(|p| p.until <= now) {
            return KeepAliveAction::ResetExtendPause;
        }

        if !logged_in {
            return KeepAliveAction::Idle;
        }

        if let Some(last) = read(&self.last_non_ping_message)
            && now - last > self.settings.force_logout_after
        {
            return KeepAliveAction::ForceLogout;
        }

        if !ban.banned && pause.is_none() && !awaiting_response && self.keepalive_due(now) {
            return KeepAliveAction::Ping;
        }

        KeepAliveAction::Idle
    }

    pub fn snapshot(&self) -> GuardSnapshot {
        GuardSnapshot {
            ban: self.ban_state(),
            extended_pause: self.extended_pause(),
            last_message: read(&self.last_message),
            last_udp_message: read(&self.last_udp_message),
            last_non_ping_message: read(&self.last_non_ping_message),
            last_ping: read(&self.last_ping),
        }
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("settings", &self.settings)
            .field("ban", &self.ban_state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn guard() -> (SessionGuard, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let guard = SessionGuard::new(GuardSettings::default(), Arc::new(clock.clone()));
        (guard, clock)
    }

    #[test]
    fn test_keepalive_spacing_boundary() {
        let (guard, clock) = guard();
        assert!(guard.can_send(SendKind::KeepAlive));

        guard.record_sent(SendKind::KeepAlive);
        clock.advance(ChronoDuration::milliseconds(44_900));
        assert!(!guard.can_send(SendKind::KeepAlive));
        assert!(guard.can_send(SendKind::Command));

        clock.advance(ChronoDuration::milliseconds(100));
        assert!(guard.can_send(SendKind::KeepAlive));
    }

    #[test]
    fn test_ban_blocks_everything_until_unbanned() {
        let (guard, _clock) = guard();
        let mut rx = guard.subscribe_ban();

        guard.set_banned(BanOrigin::Udp, "555 BANNED");
        assert!(guard.is_banned());
        assert!(!guard.can_send(SendKind::Command));
        assert!(!guard.can_send(SendKind::KeepAlive));
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().banned);

        assert!(guard.unban("operator"));
        assert!(!guard.unban("operator"));
        assert!(guard.can_send(SendKind::Command));
        assert!(!rx.borrow_and_update().banned);
    }

    #[test]
    fn test_repeated_ban_restarts_the_clock() {
        let (guard, clock) = guard();
        guard.set_banned(BanOrigin::Udp, "555 BANNED");
        let first = guard.ban_state().since.unwrap();

        clock.advance(ChronoDuration::hours(1));
        guard.set_banned(BanOrigin::Http, "<error>Banned</error>");
        let state = guard.ban_state();
        assert!(state.banned);
        assert_eq!(state.origin, Some(BanOrigin::Http));
        assert_eq!(state.since, Some(first + ChronoDuration::hours(1)));
    }

    #[test]
    fn test_ban_expires_only_after_reset_period() {
        let (guard, clock) = guard();
        guard.set_banned(BanOrigin::Udp, "555 BANNED");

        clock.advance(ChronoDuration::hours(11));
        assert!(!guard.expire_ban());
        assert_eq!(guard.keepalive_action(true, false), KeepAliveAction::Idle);

        clock.advance(ChronoDuration::hours(1));
        assert_eq!(guard.keepalive_action(true, false), KeepAliveAction::ExpireBan);
        assert!(guard.expire_ban());
        assert!(!guard.is_banned());
    }

    #[test]
    fn test_ban_never_expires_when_reset_disabled() {
        let clock = ManualClock::default();
        let settings = GuardSettings {
            ban_reset_after: None,
            ..GuardSettings::default()
        };
        let guard = SessionGuard::new(settings, Arc::new(clock.clone()));
        guard.set_banned(BanOrigin::Udp, "555 BANNED");
        clock.advance(ChronoDuration::days(30));
        assert!(!guard.expire_ban());
        assert!(guard.is_banned());
    }

    #[test]
    fn test_extended_pause_window() {
        let (guard, clock) = guard();
        guard.extend_pause(Duration::from_secs(300), "602 SERVER BUSY");
        assert!(!guard.can_send(SendKind::Command));
        assert!(guard.extended_pause().is_some());

        clock.advance(ChronoDuration::seconds(300));
        assert!(guard.can_send(SendKind::Command));
        assert_eq!(
            guard.keepalive_action(false, false),
            KeepAliveAction::ResetExtendPause
        );
        guard.reset_extend_pause();
        assert_eq!(guard.keepalive_action(false, false), KeepAliveAction::Idle);
    }

    #[test]
    fn test_pause_changes_are_published() {
        let (guard, _clock) = guard();
        let mut signals = guard.subscribe();
        assert!(signals.pause.borrow_and_update().is_none());

        guard.extend_pause(Duration::from_secs(300), "602 SERVER BUSY");
        assert!(signals.pause.has_changed().unwrap());
        let pause = signals.pause.borrow_and_update().clone().unwrap();
        assert_eq!(pause.until, guard.now() + ChronoDuration::seconds(300));
        assert_eq!(pause.reason, "602 SERVER BUSY");

        guard.reset_extend_pause();
        assert!(signals.pause.has_changed().unwrap());
        assert!(signals.pause.borrow_and_update().is_none());
        assert!(!signals.ban.borrow().banned);
    }

    #[test]
    fn test_keepalive_decisions() {
        let (guard, clock) = guard();
        assert_eq!(guard.keepalive_action(false, false), KeepAliveAction::Idle);

        guard.record_sent(SendKind::Command);
        assert_eq!(guard.keepalive_action(true, false), KeepAliveAction::Idle);

        clock.advance(ChronoDuration::seconds(45));
        assert_eq!(guard.keepalive_action(true, false), KeepAliveAction::Ping);
        assert_eq!(guard.keepalive_action(true, true), KeepAliveAction::Idle);

        guard.record_sent(SendKind::KeepAlive);
        clock.advance(ChronoDuration::seconds(10 * 60 - 45));
        assert_eq!(guard.keepalive_action(true, false), KeepAliveAction::Ping);

        clock.advance(ChronoDuration::seconds(1));
        assert_eq!(guard.keepalive_action(true, false), KeepAliveAction::ForceLogout);
    }

    #[test]
    fn test_snapshot_tracks_categories() {
        let (guard, _clock) = guard();
        guard.record_http();
        let snapshot = guard.snapshot();
        assert!(snapshot.last_message.is_some());
        assert!(snapshot.last_udp_message.is_none());

        guard.record_sent(SendKind::KeepAlive);
        let snapshot = guard.snapshot();
        assert!(snapshot.last_ping.is_some());
        assert!(snapshot.last_non_ping_message.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_slots_are_spaced() {
        let (guard, _clock) = guard();
        let start = Instant::now();
        guard.wait_for_send_slot().await;
        guard.wait_for_send_slot().await;
        guard.wait_for_send_slot().await;
        assert!(start.elapsed() >= Duration::from_millis(5000));
        assert!(guard.send_delay() > Duration::ZERO);
    }
}
