//! `SQLite` schema definitions for treezam.

/// Registered users and their gamification counters.
pub const CREATE_USERS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    total_trees_identified INTEGER NOT NULL DEFAULT 0,
    unique_species_count INTEGER NOT NULL DEFAULT 0,
    experience INTEGER NOT NULL DEFAULT 0,
    level INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
)
";

/// Login sessions, keyed by the BLAKE3 hash of the bearer token.
pub const CREATE_SESSIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    token_hash TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
)
";

/// Tree identifications.
pub const CREATE_IDENTIFICATIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS identifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    image_url TEXT NOT NULL,
    species TEXT NOT NULL,
    scientific_name TEXT,
    confidence REAL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    address TEXT,
    city TEXT,
    country TEXT,
    identified_at TEXT NOT NULL,
    notes TEXT
)
";

/// Challenge definitions.
pub const CREATE_CHALLENGES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS challenges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    kind TEXT NOT NULL,
    target_value INTEGER NOT NULL,
    city TEXT,
    country TEXT,
    longitude REAL,
    latitude REAL,
    radius_m REAL,
    start_date TEXT,
    end_date TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    reward_experience INTEGER NOT NULL DEFAULT 0,
    reward_achievement TEXT,
    created_at TEXT NOT NULL
)
";

/// Per-user challenge standing.
pub const CREATE_PARTICIPANTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS challenge_participants (
    challenge_id INTEGER NOT NULL REFERENCES challenges(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    progress INTEGER NOT NULL DEFAULT 0,
    completed INTEGER NOT NULL DEFAULT 0,
    completed_at TEXT,
    last_activity_date TEXT,
    joined_at TEXT NOT NULL,
    PRIMARY KEY (challenge_id, user_id)
)
";

/// Achievements earned by users, one row per distinct name.
pub const CREATE_ACHIEVEMENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS achievements (
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    earned_at TEXT NOT NULL,
    PRIMARY KEY (user_id, name)
)
";

/// Per-user history, newest first.
pub const CREATE_IDENTIFICATIONS_USER_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_identifications_user
ON identifications(user_id, identified_at DESC)
";

/// Bounding-box prefilter for radius queries.
pub const CREATE_IDENTIFICATIONS_GEO_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_identifications_geo
ON identifications(latitude, longitude)
";

/// Lookup of the challenges a user joined.
pub const CREATE_PARTICIPANTS_USER_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_participants_user
ON challenge_participants(user_id)
";

/// Session pruning.
pub const CREATE_SESSIONS_EXPIRY_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at)
";

/// Key-value store for schema bookkeeping.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_USERS_TABLE,
    CREATE_SESSIONS_TABLE,
    CREATE_IDENTIFICATIONS_TABLE,
    CREATE_CHALLENGES_TABLE,
    CREATE_PARTICIPANTS_TABLE,
    CREATE_ACHIEVEMENTS_TABLE,
    CREATE_IDENTIFICATIONS_USER_INDEX,
    CREATE_IDENTIFICATIONS_GEO_INDEX,
    CREATE_PARTICIPANTS_USER_INDEX,
    CREATE_SESSIONS_EXPIRY_INDEX,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.trim().is_empty());
        }
    }

    #[test]
    fn test_users_table_has_unique_identity_columns() {
        assert!(CREATE_USERS_TABLE.contains("username TEXT NOT NULL UNIQUE"));
        assert!(CREATE_USERS_TABLE.contains("email TEXT NOT NULL UNIQUE"));
    }

    #[test]
    fn test_participants_keyed_by_challenge_and_user() {
        assert!(CREATE_PARTICIPANTS_TABLE.contains("PRIMARY KEY (challenge_id, user_id)"));
    }
}
