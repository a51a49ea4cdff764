//! Locally hidden messages ("delete for me").
//!
//! Hiding a message never touches the server copy; the row here is the only
//! record, and only this device filters the message out.

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use confide_shared::MessageId;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Hide a message on this device. Idempotent.
    pub fn hide_message(&self, id: MessageId) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO hidden_messages (message_id, hidden_at) VALUES (?1, ?2)",
            params![id.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Un-hide a message. Returns whether a row was removed.
    pub fn unhide_message(&self, id: MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM hidden_messages WHERE message_id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn is_hidden(&self, id: MessageId) -> Result<bool> {
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM hidden_messages WHERE message_id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Every hidden message id, for filtering a fetched conversation in one pass.
    pub fn hidden_ids(&self) -> Result<HashSet<MessageId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT message_id FROM hidden_messages")?;

        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut ids = HashSet::new();
        for row in rows {
            ids.insert(MessageId(Uuid::parse_str(&row?)?));
        }
        Ok(ids)
    }
}
