//! v001 -- Initial schema creation.
//!
//! Creates the three device-local tables: `notification_preferences`,
//! `hidden_messages`, and `outbox`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Per-category notification preferences
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS notification_preferences (
    user_id  TEXT NOT NULL,                   -- UUID v4
    category TEXT NOT NULL,                   -- messages | mentions | replies
    enabled  INTEGER NOT NULL DEFAULT 1,

    PRIMARY KEY (user_id, category)
);

-- ----------------------------------------------------------------
-- Messages hidden on this device only ("delete for me")
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS hidden_messages (
    message_id TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    hidden_at  TEXT NOT NULL                  -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Offline outbox of queued confession posts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS outbox (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    room         TEXT NOT NULL,
    content      TEXT NOT NULL,
    is_anonymous INTEGER NOT NULL DEFAULT 0,
    queued_at    TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
