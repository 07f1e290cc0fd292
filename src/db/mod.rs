// Database module
// SQLite file holding the coordinator's persisted state.

pub mod migrations;
pub mod store;

pub use store::{StateKey, StateStore};

use std::path::Path;

use anyhow::Result;
use rusqlite::Connection;

/// Open a connection with pragmas set. Does NOT run migrations.
pub fn open_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}

/// Create the parent directory, open the DB and run migrations.
/// Call once at startup.
pub fn ensure_initialized(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Cannot create state directory {}: {}. Check directory permissions.",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let conn = open_connection(db_path)?;
    migrations::run_migrations(&conn)?;
    Ok(())
}
