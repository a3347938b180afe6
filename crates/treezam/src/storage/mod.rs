//! Storage layer for treezam.
//!
//! This module provides `SQLite`-based persistent storage for users, login
//! sessions, tree identifications and challenges. Query methods are split by
//! record kind across the submodules; all of them hang off [`Storage`].

mod challenges;
mod identifications;
pub mod migrations;
pub mod schema;
mod sessions;
mod users;

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Storage engine for treezam records.
///
/// Wraps a single `SQLite` connection. The connection is not shared between
/// threads; the server guards a `Storage` with a mutex.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` succeeds and rolls back when it fails. Must not be
    /// nested.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `f`, or a database error from the
    /// transaction itself.
    pub fn transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            users: self.count_rows("users")?,
            identifications: self.count_rows("identifications")?,
            challenges: self.count_rows("challenges")?,
            participants: self.count_rows("challenge_participants")?,
            sessions: self.count_rows("sessions")?,
            newest_identification: self.newest_identification_time()?,
            db_size_bytes,
        })
    }

    fn count_rows(&self, table: &'static str) -> Result<i64> {
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
        Ok(count)
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Registered users.
    pub users: i64,
    /// Stored identifications.
    pub identifications: i64,
    /// Defined challenges.
    pub challenges: i64,
    /// Challenge memberships.
    pub participants: i64,
    /// Live or not-yet-pruned sessions.
    pub sessions: i64,
    /// Time of the most recent identification.
    pub newest_identification: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

/// Encode a timestamp as fixed-width RFC 3339 so text order matches time order.
pub(crate) fn encode_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decode a timestamp column written by [`encode_time`].
pub(crate) fn decode_time(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Decode a nullable timestamp column.
pub(crate) fn decode_optional_time(
    idx: usize,
    value: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| decode_time(idx, &v)).transpose()
}

/// Convert a `LIMIT` argument; `None` means unlimited (`-1` in `SQLite`).
pub(crate) fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_open_in_memory() {
        assert!(Storage::open_in_memory().is_ok());
    }

    #[test]
    fn test_path() {
        assert_eq!(storage().path().to_string_lossy(), ":memory:");
    }

    #[test]
    fn test_encode_time_is_fixed_width() {
        let a = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let b = a + chrono::Duration::microseconds(1);

        assert_eq!(encode_time(a), "2024-01-02T03:04:05.000000Z");
        assert_eq!(encode_time(a).len(), encode_time(b).len());
        assert!(encode_time(a) < encode_time(b));
    }

    #[test]
    fn test_decode_time_round_trip_and_error() {
        let t = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        assert_eq!(decode_time(0, &encode_time(t)).unwrap(), t);
        assert!(decode_time(0, "yesterday").is_err());
        assert_eq!(decode_optional_time(0, None).unwrap(), None);
    }

    #[test]
    fn test_sql_limit() {
        assert_eq!(sql_limit(None), -1);
        assert_eq!(sql_limit(Some(10)), 10);
    }

    #[test]
    fn test_stats_empty() {
        let stats = storage().stats().unwrap();

        assert_eq!(stats.users, 0);
        assert_eq!(stats.identifications, 0);
        assert!(stats.newest_identification.is_none());
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_stats_with_data() {
        let storage = storage();
        let alice = user(&storage, "alice");
        plant(&storage, alice.id, "Oak", Utc::now());

        let stats = storage.stats().unwrap();
        assert_eq!(stats.users, 1);
        assert_eq!(stats.identifications, 1);
        assert!(stats.newest_identification.is_some());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let storage = storage();
        let result: Result<()> = storage.transaction(|s| {
            user(s, "ghost");
            Err(Error::invalid("abort"))
        });

        assert!(result.is_err());
        assert!(storage.find_user_by_username("ghost").unwrap().is_none());
    }

    #[test]
    fn test_transaction_commits() {
        let storage = storage();
        let created = storage.transaction(|s| Ok(user(s, "bob"))).unwrap();

        assert_eq!(storage.get_user(created.id).unwrap().unwrap().username, "bob");
    }

    #[test]
    fn test_open_file_based_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("treezam.db");

        let storage = Storage::open(&db_path).unwrap();
        user(&storage, "carol");

        assert!(db_path.exists());
        assert_eq!(storage.path(), db_path);
        assert!(storage.stats().unwrap().db_size_bytes > 0);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("treezam.db");

        {
            let storage = Storage::open(&db_path).unwrap();
            user(&storage, "dave");
        }

        let storage = Storage::open(&db_path).unwrap();
        assert!(storage.find_user_by_username("dave").unwrap().is_some());
    }
}
