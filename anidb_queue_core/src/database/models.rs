//! Row conversions shared by the repositories

use crate::Result;
use crate::commands::{CommandKind, CommandRequest};
use crate::store::AniDbRecord;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

/// Columns selected for a command row, in a fixed order
pub(crate) const COMMAND_COLUMNS: &str = "id, identity, queue, payload, priority, date_due, status, \
     attempt_count, last_error, created_at, updated_at";

pub(crate) const RECORD_COLUMNS: &str = "kind, record_key, data, updated_at";

/// Serde tag of the payload, stored next to it for ad-hoc queries
pub(crate) fn command_type(kind: &CommandKind) -> Result<String> {
    let value = serde_json::to_value(kind)?;
    Ok(value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string())
}

pub(crate) fn row_to_command(row: &SqliteRow) -> Result<CommandRequest> {
    let payload: String = row.try_get("payload")?;
    let attempt_count: i64 = row.try_get("attempt_count")?;

    Ok(CommandRequest {
        id: row.try_get("id")?,
        identity: row.try_get("identity")?,
        queue: row.try_get("queue")?,
        kind: serde_json::from_str(&payload)?,
        priority: row.try_get("priority")?,
        date_due: time_utils::from_millis(row.try_get("date_due")?),
        status: row.try_get("status")?,
        attempt_count: attempt_count.max(0) as u32,
        last_error: row.try_get("last_error")?,
        created_at: time_utils::from_millis(row.try_get("created_at")?),
        updated_at: time_utils::from_millis(row.try_get("updated_at")?),
    })
}

pub(crate) fn row_to_record(row: &SqliteRow) -> Result<AniDbRecord> {
    let data: String = row.try_get("data")?;

    Ok(AniDbRecord {
        kind: row.try_get("kind")?,
        key: row.try_get("record_key")?,
        data: serde_json::from_str(&data)?,
        updated_at: time_utils::from_millis(row.try_get("updated_at")?),
    })
}

/// Utility functions for timestamp conversion
pub mod time_utils {
    use chrono::{DateTime, Utc};

    /// Milliseconds since the Unix epoch
    pub fn to_millis(time: DateTime<Utc>) -> i64 {
        time.timestamp_millis()
    }

    /// Inverse of [`to_millis`]; out-of-range values map to the epoch
    pub fn from_millis(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }

    /// Get current time as milliseconds since Unix epoch
    pub fn now_millis() -> i64 {
        to_millis(Utc::now())
    }
}
