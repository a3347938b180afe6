//! Schema versioning.
//!
//! Each entry in [`MIGRATIONS`] moves the database up one version. Steps run
//! in order inside a transaction and record the new version in `metadata`.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{Error, Result};

use super::schema::{CREATE_METADATA_TABLE, SCHEMA_STATEMENTS};

/// One schema step: the version it produces and the statements that get
/// there.
struct Migration {
    version: u32,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    statements: SCHEMA_STATEMENTS,
}];

/// The schema version a fully migrated database has.
pub const CURRENT_VERSION: u32 = 1;

const VERSION_KEY: &str = "schema_version";

/// Bring the database up to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns [`Error::DatabaseMigration`] if the stored version is unreadable
/// or newer than this build understands, and a query error if a step fails.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute(CREATE_METADATA_TABLE, [])?;

    let stored = schema_version(conn)?;
    if stored > CURRENT_VERSION {
        return Err(migration_error(format!(
            "database schema version {stored} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > stored) {
        apply(conn, migration)?;
    }
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for statement in migration.statements {
        tx.execute(statement, [])?;
    }
    tx.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, migration.version.to_string()),
    )?;
    tx.commit()?;

    info!("Applied schema migration {}", migration.version);
    Ok(())
}

/// The stored schema version; 0 for a fresh database.
fn schema_version(conn: &Connection) -> Result<u32> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match stored {
        None => Ok(0),
        Some(value) => value
            .parse()
            .map_err(|_| migration_error(format!("invalid schema version: {value}"))),
    }
}

fn migration_error(message: String) -> Error {
    Error::DatabaseMigration { message }
}
