//! Offline outbox of confession posts.
//!
//! Posts written while the device has no connectivity are queued here and
//! drained in FIFO order once the transport comes back.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;

/// One queued confession post awaiting delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPost {
    pub seq: i64,
    pub room: String,
    pub content: String,
    pub is_anonymous: bool,
    pub queued_at: DateTime<Utc>,
}

impl Database {
    /// Append a post to the outbox. Returns its queue sequence number.
    pub fn enqueue_post(&self, room: &str, content: &str, is_anonymous: bool) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO outbox (room, content, is_anonymous, queued_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![room, content, is_anonymous as i64, Utc::now().to_rfc3339()],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// The oldest queued posts, up to `limit`, in enqueue order.
    pub fn queued_posts(&self, limit: u32) -> Result<Vec<QueuedPost>> {
        let mut stmt = self.conn().prepare(
            "SELECT seq, room, content, is_anonymous, queued_at
             FROM outbox ORDER BY seq ASC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], row_to_post)?;

        let mut posts = Vec::new();
        for row in rows {
            posts.push(row?);
        }
        Ok(posts)
    }

    /// Remove a delivered (or abandoned) post. Returns whether it existed.
    pub fn remove_post(&self, seq: i64) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM outbox WHERE seq = ?1", params![seq])?;
        Ok(affected > 0)
    }
}

fn row_to_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedPost> {
    let ts_str: String = row.get(4)?;
    let queued_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(QueuedPost {
        seq: row.get(0)?,
        room: row.get(1)?,
        content: row.get(2)?,
        is_anonymous: row.get::<_, i64>(3)? != 0,
        queued_at,
    })
}
