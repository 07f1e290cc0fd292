// State store
// Flat key -> JSON value map. Every write touches only the keys it is given,
// so a single-field change never rewrites the whole snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Persisted top-level keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    Settings,
    Libraries,
    JobHistory,
    JobMeta,
    SelectedLibraryPath,
    SelectedLibraryName,
}

impl StateKey {
    pub const ALL: [StateKey; 6] = [
        StateKey::Settings,
        StateKey::Libraries,
        StateKey::JobHistory,
        StateKey::JobMeta,
        StateKey::SelectedLibraryPath,
        StateKey::SelectedLibraryName,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StateKey::Settings => "settings",
            StateKey::Libraries => "libraries",
            StateKey::JobHistory => "jobHistory",
            StateKey::JobMeta => "jobMeta",
            StateKey::SelectedLibraryPath => "selectedLibraryPath",
            StateKey::SelectedLibraryName => "selectedLibraryName",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateStore {
    db_path: PathBuf,
}

impl StateStore {
    /// Initialize the DB file (directory, pragmas, migrations).
    pub fn open(db_path: &Path) -> Result<Self> {
        super::ensure_initialized(db_path)?;
        Ok(Self { db_path: db_path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Values for the requested keys. Keys never written are absent from the map.
    pub fn load(&self, keys: &[StateKey]) -> Result<HashMap<StateKey, Value>> {
        let conn = super::open_connection(&self.db_path)?;
        let mut stmt = conn.prepare("SELECT value FROM state_kv WHERE key = ?1")?;

        let mut values = HashMap::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = stmt.query_row([key.as_str()], |row| row.get(0)).optional()?;
            let Some(raw) = raw else { continue };
            match serde_json::from_str(&raw) {
                Ok(value) => {
                    values.insert(*key, value);
                }
                Err(e) => log::warn!("Ignoring unreadable state key '{}': {}", key.as_str(), e),
            }
        }
        Ok(values)
    }

    /// Upsert the given keys in one transaction. Last write wins per key.
    pub fn save(&self, entries: &[(StateKey, Value)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut conn = super::open_connection(&self.db_path)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO state_kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            )?;
            for (key, value) in entries {
                stmt.execute(params![key.as_str(), serde_json::to_string(value)?])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

/// Decode one loaded key, falling back to the default when it is absent or has
/// the wrong shape.
pub fn decode_or_default<T: DeserializeOwned + Default>(values: &HashMap<StateKey, Value>, key: StateKey) -> T {
    match values.get(&key) {
        None | Some(Value::Null) => T::default(),
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            log::warn!("State key '{}' has an unexpected shape, using defaults: {}", key.as_str(), e);
            T::default()
        }),
    }
}
