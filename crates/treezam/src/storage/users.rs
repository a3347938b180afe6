use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::{decode_time, encode_time, sql_limit, Storage};
use crate::error::Result;
use crate::leaderboard::Metric;
use crate::model::{User, UserStats};

const USER_COLUMNS: &str = "id, username, email, password_hash, total_trees_identified, \
     unique_species_count, experience, level, created_at";

impl Storage {
    /// Register a user with zeroed counters at level 1.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails, including uniqueness
    /// violations on username or email.
    pub fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<User> {
        self.conn.execute(
            r"
            INSERT INTO users (username, email, password_hash, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ",
            params![username, email, password_hash, encode_time(now)],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!("Created user {} with id {}", username, id);
        Ok(User {
            id,
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            total_trees_identified: 0,
            unique_species_count: 0,
            experience: 0,
            level: 1,
            achievements: Vec::new(),
            created_at: now,
        })
    }

    /// Get a user by id, with achievements.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.find_user_where("id = ?1", id)
    }

    /// Get a user by (lowercased) email, with achievements.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_user_where("email = ?1", email)
    }

    /// Get a user by username, with achievements.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.find_user_where("username = ?1", username)
    }

    fn find_user_where(&self, condition: &str, value: impl rusqlite::ToSql) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE {condition}"),
                [value],
                row_to_user,
            )
            .optional()?;

        match user {
            Some(mut user) => {
                user.achievements = self.achievements(user.id)?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    /// Change a user's username.
    ///
    /// Returns `false` if the user does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails, including a
    /// uniqueness violation when the name is taken.
    pub fn update_username(&self, id: i64, username: &str) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE users SET username = ?1 WHERE id = ?2",
            params![username, id],
        )?;
        Ok(affected > 0)
    }

    /// Overwrite a user's gamification counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn update_user_stats(&self, id: i64, stats: &UserStats) -> Result<()> {
        self.conn.execute(
            r"
            UPDATE users
            SET total_trees_identified = ?1, unique_species_count = ?2,
                experience = ?3, level = ?4
            WHERE id = ?5
            ",
            params![
                stats.total_trees_identified,
                stats.unique_species_count,
                stats.experience,
                stats.level,
                id,
            ],
        )?;
        Ok(())
    }

    /// Grant an achievement.
    ///
    /// Returns `false` if the user already had it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn add_achievement(&self, user_id: i64, name: &str, now: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn.execute(
            "INSERT OR IGNORE INTO achievements (user_id, name, earned_at) VALUES (?1, ?2, ?3)",
            params![user_id, name, encode_time(now)],
        )?;
        Ok(affected > 0)
    }

    /// Achievement names of a user, in the order they were earned.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn achievements(&self, user_id: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM achievements WHERE user_id = ?1 ORDER BY earned_at ASC, name ASC",
        )?;
        let names = stmt
            .query_map([user_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Users ordered by `metric` descending, earliest registration first on ties.
    ///
    /// Achievements are not loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn top_users(&self, metric: Metric, limit: usize) -> Result<Vec<User>> {
        let column = metric.column();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY {column} DESC, created_at ASC, id ASC LIMIT ?1"
        ))?;

        let users = stmt
            .query_map([sql_limit(Some(limit))], row_to_user)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Number of users whose `metric` is strictly greater than `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_users_above(&self, metric: Metric, value: i64) -> Result<i64> {
        let column = metric.column();
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM users WHERE {column} > ?1"),
            [value],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Total number of users.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_users(&self) -> Result<i64> {
        self.count_rows("users")
    }
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    let created_at: String = row.get(8)?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        total_trees_identified: row.get(4)?,
        unique_species_count: row.get(5)?,
        experience: row.get(6)?,
        level: row.get(7)?,
        achievements: Vec::new(),
        created_at: decode_time(8, &created_at)?,
    })
}
