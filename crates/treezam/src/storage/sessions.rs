use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::info;

use super::{encode_time, Storage};
use crate::error::Result;
use crate::model::User;

impl Storage {
    /// Store a session for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn create_session(
        &self,
        token_hash: &str,
        user_id: i64,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            r"
            INSERT INTO sessions (token_hash, user_id, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ",
            params![token_hash, user_id, encode_time(now), encode_time(expires_at)],
        )?;
        Ok(())
    }

    /// The user owning an unexpired session.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn user_for_session(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<User>> {
        let user_id: Option<i64> = self
            .conn
            .query_row(
                "SELECT user_id FROM sessions WHERE token_hash = ?1 AND expires_at > ?2",
                params![token_hash, encode_time(now)],
                |row| row.get(0),
            )
            .optional()?;

        match user_id {
            Some(id) => self.get_user(id),
            None => Ok(None),
        }
    }

    /// Remove a session.
    ///
    /// Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete_session(&self, token_hash: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM sessions WHERE token_hash = ?1", [token_hash])?;
        Ok(affected > 0)
    }

    /// Remove every session that expired at or before `now`.
    ///
    /// Returns the number of sessions deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn prune_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn.execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            [encode_time(now)],
        )?;

        if affected > 0 {
            info!("Pruned {} expired sessions", affected);
        }
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_session_lookup() {
        let storage = storage();
        let alice = user(&storage, "alice");
        let now = Utc::now();

        storage
            .create_session("h1", alice.id, now, now + Duration::hours(1))
            .unwrap();

        let found = storage.user_for_session("h1", now).unwrap().unwrap();
        assert_eq!(found.id, alice.id);
        assert!(storage.user_for_session("h2", now).unwrap().is_none());
    }

    #[test]
    fn test_expired_session_is_ignored() {
        let storage = storage();
        let alice = user(&storage, "alice");
        let now = Utc::now();

        storage
            .create_session("h1", alice.id, now, now + Duration::hours(1))
            .unwrap();

        assert!(storage
            .user_for_session("h1", now + Duration::hours(2))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_delete_session() {
        let storage = storage();
        let alice = user(&storage, "alice");
        let now = Utc::now();
        storage
            .create_session("h1", alice.id, now, now + Duration::hours(1))
            .unwrap();

        assert!(storage.delete_session("h1").unwrap());
        assert!(!storage.delete_session("h1").unwrap());
        assert!(storage.user_for_session("h1", now).unwrap().is_none());
    }

    #[test]
    fn test_prune_expired_sessions() {
        let storage = storage();
        let alice = user(&storage, "alice");
        let now = Utc::now();
        storage
            .create_session("old", alice.id, now - Duration::days(2), now - Duration::days(1))
            .unwrap();
        storage
            .create_session("new", alice.id, now, now + Duration::days(1))
            .unwrap();

        assert_eq!(storage.prune_expired_sessions(now).unwrap(), 1);
        assert_eq!(storage.stats().unwrap().sessions, 1);
        assert!(storage.user_for_session("new", now).unwrap().is_some());
    }
}
