//! AniDB-derived records written by commands

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(feature = "database", sqlx(type_name = "TEXT"))]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Keyed by anime id
    #[cfg_attr(feature = "database", sqlx(rename = "anime"))]
    Anime,
    /// Keyed by ED2K
    #[cfg_attr(feature = "database", sqlx(rename = "file"))]
    File,
    /// Keyed by local path
    #[cfg_attr(feature = "database", sqlx(rename = "hash"))]
    Hash,
    /// Keyed by group id
    #[cfg_attr(feature = "database", sqlx(rename = "group"))]
    Group,
    /// Keyed by ED2K
    #[cfg_attr(feature = "database", sqlx(rename = "mylist"))]
    MyList,
    /// Keyed by anime id
    #[cfg_attr(feature = "database", sqlx(rename = "vote"))]
    Vote,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Anime => "anime",
            Self::File => "file",
            Self::Hash => "hash",
            Self::Group => "group",
            Self::MyList => "mylist",
            Self::Vote => "vote",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AniDbRecord {
    pub kind: RecordKind,
    pub key: String,
    pub data: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl AniDbRecord {
    pub fn new(
        kind: RecordKind,
        key: impl Into<String>,
        data: serde_json::Value,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            key: key.into(),
            data,
            updated_at,
        }
    }

    /// Whether the record was refreshed within `max_age` of `now`
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now - self.updated_at < max_age
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, kind: RecordKind, key: &str) -> Result<Option<AniDbRecord>>;

    /// Insert or replace by `(kind, key)`
    async fn save(&self, record: &AniDbRecord) -> Result<()>;

    async fn delete(&self, kind: RecordKind, key: &str) -> Result<bool>;

    async fn get_all(&self, kind: RecordKind) -> Result<Vec<AniDbRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_freshness() {
        let saved = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let record = AniDbRecord::new(RecordKind::Anime, "1", serde_json::json!({}), saved);

        let four_hours = chrono::Duration::hours(4);
        assert!(record.is_fresh(saved + chrono::Duration::hours(3), four_hours));
        assert!(!record.is_fresh(saved + four_hours, four_hours));
    }
}
