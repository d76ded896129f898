//! Test data builders for creating queue scenarios

use anidb_queue_core::{CommandKind, CommandRequest, CommandStatus};
use chrono::{DateTime, Duration, Utc};

/// Builder for [`CommandRequest`] rows
///
/// ```rust
/// use anidb_test_utils::CommandBuilder;
/// use anidb_queue_core::CommandKind;
///
/// let request = CommandBuilder::new(CommandKind::GetReleaseGroup { group_id: 7 })
///     .priority(1)
///     .build();
/// assert_eq!(request.identity, "GetReleaseGroup:7");
/// ```
pub struct CommandBuilder {
    kind: CommandKind,
    now: DateTime<Utc>,
    priority: Option<i32>,
    due_in: Duration,
    status: CommandStatus,
    attempt_count: u32,
}

impl CommandBuilder {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            now: Utc::now(),
            priority: None,
            due_in: Duration::zero(),
            status: CommandStatus::Pending,
            attempt_count: 0,
        }
    }

    pub fn anime(anime_id: u32) -> Self {
        Self::new(CommandKind::GetAnimeHttp {
            anime_id,
            force_refresh: false,
        })
    }

    pub fn file(size: u64, ed2k: &str) -> Self {
        Self::new(CommandKind::GetFile {
            size,
            ed2k: ed2k.to_string(),
        })
    }

    /// Creation time; the due date is relative to it
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn due_in(mut self, delay: std::time::Duration) -> Self {
        self.due_in = anidb_queue_core::clock::chrono_duration(delay);
        self
    }

    pub fn status(mut self, status: CommandStatus) -> Self {
        self.status = status;
        self
    }

    pub fn attempts(mut self, attempt_count: u32) -> Self {
        self.attempt_count = attempt_count;
        self
    }

    pub fn build(self) -> CommandRequest {
        let mut request = CommandRequest::new(self.kind, self.now).due_at(self.now + self.due_in);
        if let Some(priority) = self.priority {
            request = request.with_priority(priority);
        }
        request.status = self.status;
        request.attempt_count = self.attempt_count;
        request
    }
}

/// Minimal `request=anime` document
pub fn anime_xml(anime_id: u32, title: &str, episodes: u32, picture: Option<&str>) -> String {
    let picture = picture
        .map(|p| format!("\n  <picture>{p}</picture>"))
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<anime id="{anime_id}" restricted="false">
  <type>TV Series</type>
  <episodecount>{episodes}</episodecount>
  <titles><title xml:lang="x-jat" type="main">{title}</title></titles>{picture}
</anime>"#
    )
}

/// `220 FILE` reply text for the given ids (`0` means unknown)
pub fn file_reply(file_id: u32, anime_id: u32, episode_id: u32, group_id: u32) -> String {
    format!("220 FILE\n{file_id}|{anime_id}|{episode_id}|{group_id}|0")
}

/// `250 GROUP` reply text
pub fn group_reply(group_id: u32, name: &str, short_name: &str) -> String {
    format!("250 GROUP\n{group_id}|832|1445|39|3412|{name}|{short_name}|#irc|irc.rizon.net|")
}
