//! Database schema definitions

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initial schema: command queues and migration tracking
pub const SCHEMA_V1: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- Persisted commands of every named queue
CREATE TABLE IF NOT EXISTS commands (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity TEXT NOT NULL,
    queue TEXT NOT NULL,
    command_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    priority INTEGER NOT NULL,
    date_due INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    attempt_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- At most one active command per identity
CREATE UNIQUE INDEX IF NOT EXISTS idx_commands_active_identity
    ON commands(identity) WHERE status IN ('pending', 'running');

CREATE INDEX IF NOT EXISTS idx_commands_dequeue
    ON commands(queue, status, priority, date_due, id);
"#;

/// AniDB-derived records and persisted session state
pub const SCHEMA_V2: &str = r#"
CREATE TABLE IF NOT EXISTS anidb_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    record_key TEXT NOT NULL,
    data TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(kind, record_key)
);

-- Ban state and operator pause flags
CREATE TABLE IF NOT EXISTS session_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;
