// Library module
// KiCad library records, their canonical paths and the local inventory.

pub mod inventory;
pub mod merge;
pub mod paths;

pub use inventory::{LibraryInventory, Selection};
pub use merge::merge_records;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Presence of each asset kind in a library.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetFlags {
    pub symbol: bool,
    pub footprint: bool,
    pub model: bool,
}

/// Number of items of each asset kind in a library.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetCounts {
    pub symbol: u64,
    pub footprint: u64,
    pub model: u64,
}

impl AssetCounts {
    pub fn add(&mut self, other: &AssetCounts) {
        self.symbol += other.symbol;
        self.footprint += other.footprint;
        self.model += other.model;
    }
}

/// A destination conversions write into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryRecord {
    pub id: String,
    pub name: String,
    /// Canonical prefix; identity key for merges.
    pub path: String,
    pub symbol_path: String,
    pub base_path: String,
    #[serde(default)]
    pub resolved_prefix: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub missing: bool,
    #[serde(default)]
    pub assets: AssetFlags,
    #[serde(default)]
    pub counts: AssetCounts,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub project_relative: bool,
    #[serde(default)]
    pub project_relative_path: String,
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_validation: Option<DateTime<Utc>>,
}

impl LibraryRecord {
    /// Build a fresh record for `raw_path` with a newly generated id.
    pub fn new(raw_path: &str, name: Option<&str>) -> Self {
        let now = Utc::now();
        let path = paths::canonical_prefix(raw_path);
        Self {
            id: Uuid::new_v4().to_string(),
            name: paths::sanitize_library_name(name, &path),
            symbol_path: paths::symbol_path(&path),
            base_path: paths::base_path(&path),
            path,
            resolved_prefix: None,
            active: false,
            missing: false,
            assets: AssetFlags::default(),
            counts: AssetCounts::default(),
            warnings: Vec::new(),
            project_relative: false,
            project_relative_path: String::new(),
            model_path: None,
            project_id: None,
            created_at: now,
            updated_at: now,
            last_validation: None,
        }
    }

    /// Mark project-relative and derive the `${KIPRJMOD}` model path.
    pub fn with_project_relative(mut self, relative_path: Option<&str>) -> Self {
        self.project_relative = true;
        self.project_relative_path = relative_path
            .map(paths::normalize_project_relative_path)
            .unwrap_or_default();
        if self.model_path.is_none() {
            self.model_path = Some(paths::project_model_path(&self.project_relative_path, &self.path));
        }
        self
    }

    /// Re-derive every path variant from `path` (after canonicalization).
    pub fn rederive_paths(&mut self) {
        self.path = paths::canonical_prefix(&self.path);
        self.symbol_path = paths::symbol_path(&self.path);
        self.base_path = paths::base_path(&self.path);
    }

    /// Eligible for selection.
    pub fn is_selectable(&self) -> bool {
        !self.missing
    }
}
