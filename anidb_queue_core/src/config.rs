//! Runtime configuration for the protocol client, session guard and queues
//!
//! All structs deserialize with defaults so a partial TOML file or a handful
//! of environment variables is enough to override single values.

use crate::error::{Result, ValidationError};
use crate::queue::QueueName;
use crate::security::SecureString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// AniDB connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AniDbConfig {
    /// UDP API endpoint (`host:port`)
    pub server: String,
    /// Local UDP port, 0 for an ephemeral port
    pub local_port: u16,
    /// Registered client name sent with AUTH
    pub client_name: String,
    /// Registered client version sent with AUTH
    pub client_version: u32,
    pub username: Option<String>,
    pub password: Option<SecureString>,
    /// Receive timeout for one UDP exchange
    pub request_timeout_secs: u64,
    /// Minimum spacing between two UDP requests
    pub min_send_spacing_ms: u64,
    /// Ask the server to include our public address in AUTH replies
    pub nat: bool,
    /// Base URL of the HTTP API
    pub http_base_url: String,
    /// Minimum spacing between two HTTP requests
    pub http_spacing_ms: u64,
}

impl Default for AniDbConfig {
    fn default() -> Self {
        Self {
            server: format!(
                "{}:{}",
                crate::protocol::DEFAULT_SERVER,
                crate::protocol::DEFAULT_PORT
            ),
            local_port: 0,
            client_name: "anidbqueue".to_string(),
            client_version: 1,
            username: None,
            password: None,
            request_timeout_secs: 30,
            min_send_spacing_ms: 2500,
            nat: false,
            http_base_url: "http://api.anidb.net:9001/httpapi".to_string(),
            http_spacing_ms: 2000,
        }
    }
}

impl AniDbConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn min_send_spacing(&self) -> Duration {
        Duration::from_millis(self.min_send_spacing_ms)
    }

    pub fn http_spacing(&self) -> Duration {
        Duration::from_millis(self.http_spacing_ms)
    }

    /// Username and password, both non-empty
    pub fn credentials(&self) -> Option<(String, SecureString)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some((user.clone(), pass.clone()))
            }
            _ => None,
        }
    }
}

/// Upper bound for any configured session or retry timing, thirty days
pub const MAX_TIMING_SECS: u64 = 30 * 24 * 60 * 60;

fn check_timing(parameter: &str, secs: u64) -> Result<()> {
    if secs > MAX_TIMING_SECS {
        return Err(ValidationError::invalid_parameter(
            parameter,
            &format!("must be at most {MAX_TIMING_SECS} seconds"),
        )
        .into());
    }
    Ok(())
}

/// Session keep-alive and back-off timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Interval of the keep-alive scheduler
    pub tick_interval_secs: u64,
    /// Minimum UDP silence before a keep-alive PING
    pub ping_interval_secs: u64,
    /// Non-ping silence after which the session is logged out
    pub force_logout_after_secs: u64,
    /// Back-off window requested by 6xx server errors
    pub server_busy_pause_secs: u64,
    /// Ban age after which the ban is lifted automatically, 0 for manual only
    pub ban_reset_after_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 5,
            ping_interval_secs: 45,
            force_logout_after_secs: 600,
            server_busy_pause_secs: 300,
            ban_reset_after_secs: 12 * 60 * 60,
        }
    }
}

impl SessionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_secs == 0 {
            return Err(ValidationError::invalid_parameter(
                "session.tick_interval_secs",
                "must be greater than 0",
            )
            .into());
        }
        check_timing("session.tick_interval_secs", self.tick_interval_secs)?;
        check_timing("session.ping_interval_secs", self.ping_interval_secs)?;
        check_timing("session.force_logout_after_secs", self.force_logout_after_secs)?;
        check_timing("session.server_busy_pause_secs", self.server_busy_pause_secs)?;
        check_timing("session.ban_reset_after_secs", self.ban_reset_after_secs)
    }
}

/// What happens to a command whose execution panicked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PanicPolicy {
    /// Reschedule with the normal retry back-off
    #[default]
    Retry,
    /// Mark the command failed
    Fail,
}

/// Per-queue switches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    /// Treat an active ban like a pause
    pub pauses_on_ban: bool,
    /// Start the processor paused
    pub start_paused: bool,
}

impl QueueOptions {
    fn new(pauses_on_ban: bool) -> Self {
        Self {
            pauses_on_ban,
            start_paused: false,
        }
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Retry policy and per-queue options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub initial_retry_delay_secs: u64,
    pub max_retry_delay_secs: u64,
    /// Attempts after which a retryable command fails permanently
    pub max_attempts: u32,
    pub panic_policy: PanicPolicy,
    pub general: QueueOptions,
    pub hasher: QueueOptions,
    pub images: QueueOptions,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            initial_retry_delay_secs: 2,
            max_retry_delay_secs: 300,
            max_attempts: 5,
            panic_policy: PanicPolicy::Retry,
            general: QueueOptions::new(true),
            hasher: QueueOptions::new(false),
            images: QueueOptions::new(true),
        }
    }
}

impl QueueConfig {
    pub fn options(&self, queue: QueueName) -> &QueueOptions {
        match queue {
            QueueName::General => &self.general,
            QueueName::Hasher => &self.hasher,
            QueueName::Images => &self.images,
        }
    }

    /// Exponential back-off for the given (1-based) attempt, capped
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_retry_delay_secs.max(1);
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = base.saturating_mul(2u64.saturating_pow(exponent));
        Duration::from_secs(delay.min(self.max_retry_delay_secs.max(base)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ValidationError::invalid_parameter(
                "queues.max_attempts",
                "must be at least 1",
            )
            .into());
        }
        check_timing("queues.initial_retry_delay_secs", self.initial_retry_delay_secs)?;
        check_timing("queues.max_retry_delay_secs", self.max_retry_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults() {
        let anidb = AniDbConfig::default();
        assert_eq!(anidb.server, "api.anidb.net:9000");
        assert_eq!(anidb.request_timeout(), Duration::from_secs(30));
        assert_eq!(anidb.min_send_spacing(), Duration::from_millis(2500));
        assert!(anidb.credentials().is_none());

        let session = SessionConfig::default();
        assert_eq!(session.ping_interval_secs, 45);
        assert_eq!(session.force_logout_after_secs, 600);

        let queues = QueueConfig::default();
        assert!(queues.options(QueueName::General).pauses_on_ban);
        assert!(queues.options(QueueName::Images).pauses_on_ban);
        assert!(!queues.options(QueueName::Hasher).pauses_on_ban);
    }

    #[test]
    fn test_retry_delay_is_exponential_and_capped() {
        let queues = QueueConfig::default();
        assert_eq!(queues.retry_delay(1), Duration::from_secs(2));
        assert_eq!(queues.retry_delay(2), Duration::from_secs(4));
        assert_eq!(queues.retry_delay(3), Duration::from_secs(8));
        assert_eq!(queues.retry_delay(20), Duration::from_secs(300));
    }

    #[test]
    fn test_empty_credentials_are_rejected() {
        let config = AniDbConfig {
            username: Some("user".to_string()),
            password: Some(SecureString::new("")),
            ..Default::default()
        };
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_zero_max_attempts_is_invalid() {
        let queues = QueueConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(queues.validate().is_err());
    }

    #[test]
    fn test_session_timings_are_bounded() {
        assert!(SessionConfig::default().validate().is_ok());

        let huge = SessionConfig {
            ban_reset_after_secs: u64::MAX,
            ..Default::default()
        };
        let error = huge.validate().unwrap_err();
        assert!(error.to_string().contains("session.ban_reset_after_secs"));

        let busy = SessionConfig {
            server_busy_pause_secs: MAX_TIMING_SECS + 1,
            ..Default::default()
        };
        assert!(busy.validate().is_err());

        let stalled = SessionConfig {
            tick_interval_secs: 0,
            ..Default::default()
        };
        assert!(stalled.validate().is_err());

        let month = SessionConfig {
            force_logout_after_secs: MAX_TIMING_SECS,
            ..Default::default()
        };
        assert!(month.validate().is_ok());
    }

    #[test]
    fn test_retry_delays_are_bounded() {
        let queues = QueueConfig {
            max_retry_delay_secs: u64::MAX,
            ..Default::default()
        };
        assert!(queues.validate().is_err());
        assert!(QueueConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_deserialization_keeps_defaults() {
        let queues: QueueConfig =
            serde_json::from_str(r#"{"max_attempts": 3, "panic_policy": "fail"}"#).unwrap();
        assert_eq!(queues.max_attempts, 3);
        assert_eq!(queues.panic_policy, PanicPolicy::Fail);
        assert_eq!(queues.initial_retry_delay_secs, 2);
    }

    proptest! {
        #[test]
        fn test_retry_delay_is_bounded_and_non_decreasing(
            initial in 1u64..60,
            max in 1u64..3600,
            attempt in 1u32..64,
        ) {
            let queues = QueueConfig {
                initial_retry_delay_secs: initial,
                max_retry_delay_secs: max,
                ..Default::default()
            };
            let delay = queues.retry_delay(attempt);
            let next = queues.retry_delay(attempt + 1);

            prop_assert!(delay >= Duration::from_secs(initial));
            prop_assert!(delay <= Duration::from_secs(max.max(initial)));
            prop_assert!(next >= delay);
        }
    }
}
