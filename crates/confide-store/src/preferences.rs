//! Per-category notification preferences.
//!
//! Absence of a row means the category is enabled; users only get a row
//! once they flip a toggle.

use rusqlite::params;

use confide_shared::{PreferenceCategory, UserId};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Whether notifications of `category` are enabled for `user`.
    /// Defaults to `true` when no preference has been stored.
    pub fn category_enabled(&self, user: UserId, category: PreferenceCategory) -> Result<bool> {
        let mut stmt = self.conn().prepare(
            "SELECT enabled FROM notification_preferences
             WHERE user_id = ?1 AND category = ?2",
        )?;

        let mut rows = stmt.query(params![user.to_string(), category.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(row.get::<_, i64>(0)? != 0),
            None => Ok(true),
        }
    }

    pub fn set_category_enabled(
        &self,
        user: UserId,
        category: PreferenceCategory,
        enabled: bool,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO notification_preferences (user_id, category, enabled)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id, category) DO UPDATE SET enabled = excluded.enabled",
            params![user.to_string(), category.as_str(), enabled as i64],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_enabled() {
        let db = Database::open_in_memory().unwrap();
        let user = UserId::new();

        assert!(db
            .category_enabled(user, PreferenceCategory::Mentions)
            .unwrap());
    }

    #[test]
    fn set_and_flip_back() {
        let db = Database::open_in_memory().unwrap();
        let user = UserId::new();

        db.set_category_enabled(user, PreferenceCategory::Messages, false)
            .unwrap();
        assert!(!db
            .category_enabled(user, PreferenceCategory::Messages)
            .unwrap());
        // Other categories are untouched.
        assert!(db
            .category_enabled(user, PreferenceCategory::Replies)
            .unwrap());

        db.set_category_enabled(user, PreferenceCategory::Messages, true)
            .unwrap();
        assert!(db
            .category_enabled(user, PreferenceCategory::Messages)
            .unwrap());
    }
}
