// Library inventory
// The ordered list of library records plus the derived aggregate totals and the
// "selected library" fields. All operations here are synchronous and pure with
// respect to I/O; the coordinator wraps them with backend calls and persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{merge_records, paths, AssetCounts, LibraryRecord};
use crate::backend::LibraryValidation;
use crate::constants::MISSING_ON_DISK_WARNING;
use crate::error::{CourierError, Result};

/// Library implicitly used by quick actions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub path: Option<String>,
    pub name: Option<String>,
}

/// Outcome of an upsert.
#[derive(Debug, Clone)]
pub struct Upserted {
    pub record: LibraryRecord,
    pub created: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LibraryInventory {
    libraries: Vec<LibraryRecord>,
    totals: AssetCounts,
    selection: Selection,
}

impl LibraryInventory {
    /// Rebuild from persisted records. Records stored under a non-canonical path
    /// are canonicalized and collapse onto their duplicates.
    pub fn from_persisted(records: Vec<LibraryRecord>, selection: Selection) -> Self {
        let mut inventory = Self {
            libraries: Vec::with_capacity(records.len()),
            totals: AssetCounts::default(),
            selection,
        };
        for record in records {
            inventory.upsert(record);
        }
        inventory
    }

    pub fn libraries(&self) -> &[LibraryRecord] {
        &self.libraries
    }

    pub fn totals(&self) -> AssetCounts {
        self.totals
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&LibraryRecord> {
        self.libraries.iter().find(|l| l.id == id)
    }

    pub fn find_by_path(&self, raw_path: &str) -> Option<&LibraryRecord> {
        let prefix = paths::canonical_prefix(raw_path);
        self.libraries.iter().find(|l| l.path == prefix)
    }

    /// Look a library up by id first, then by path.
    pub fn find(&self, id: Option<&str>, path: Option<&str>) -> Option<&LibraryRecord> {
        id.and_then(|id| self.get(id))
            .or_else(|| path.and_then(|p| self.find_by_path(p)))
    }

    pub fn selected(&self) -> Option<&LibraryRecord> {
        self.selection.path.as_deref().and_then(|p| self.find_by_path(p))
    }

    fn position_of(&self, record: &LibraryRecord) -> Option<usize> {
        self.libraries
            .iter()
            .position(|l| l.id == record.id)
            .or_else(|| self.libraries.iter().position(|l| l.path == record.path))
    }

    /// Insert or merge a record. Identity is `id`, then canonical `path`.
    pub fn upsert(&mut self, mut record: LibraryRecord) -> Upserted {
        record.rederive_paths();

        let outcome = match self.position_of(&record) {
            Some(idx) => {
                let merged = merge_records(&self.libraries[idx], record);
                self.libraries[idx] = merged.clone();
                Upserted { record: merged, created: false }
            }
            None => {
                self.libraries.push(record.clone());
                Upserted { record, created: true }
            }
        };

        self.recalc_totals();
        outcome
    }

    /// Remove a library. When it was the active one, the first remaining
    /// library becomes active before selection is recomputed by the caller.
    pub fn remove(&mut self, id: &str) -> Option<LibraryRecord> {
        let idx = self.libraries.iter().position(|l| l.id == id)?;
        let removed = self.libraries.remove(idx);

        if removed.active {
            if let Some(first) = self.libraries.first_mut() {
                first.active = true;
                first.updated_at = Utc::now();
            }
        }

        self.recalc_totals();
        Some(removed)
    }

    /// Field-wise sum of counts over every library.
    pub fn recalc_totals(&mut self) {
        let mut totals = AssetCounts::default();
        for library in &self.libraries {
            totals.add(&library.counts);
        }
        self.totals = totals;
    }

    /// Elect the selected library and normalize `active` flags so exactly one
    /// selectable library is active.
    ///
    /// Preference: active and present, then first present, then first of any
    /// kind. Selection fields are only rewritten when the result differs from
    /// the current value or `force` is set. Returns true when anything changed.
    pub fn ensure_selected(&mut self, force: bool) -> bool {
        let chosen = self
            .libraries
            .iter()
            .position(|l| l.active && l.is_selectable())
            .or_else(|| self.libraries.iter().position(|l| l.is_selectable()))
            .or(if self.libraries.is_empty() { None } else { Some(0) });

        let mut flags_changed = false;
        for (idx, library) in self.libraries.iter_mut().enumerate() {
            let should_be_active = Some(idx) == chosen && library.is_selectable();
            if library.active != should_be_active {
                library.active = should_be_active;
                flags_changed = true;
            }
        }

        let next = match chosen {
            Some(idx) => Selection {
                path: Some(self.libraries[idx].path.clone()),
                name: Some(self.libraries[idx].name.clone()),
            },
            None => Selection::default(),
        };

        let selection_changed = force || next != self.selection;
        if selection_changed {
            self.selection = next;
        }

        flags_changed || selection_changed
    }

    /// Explicit user choice of the selected library.
    pub fn select(&mut self, id: Option<&str>, path: Option<&str>) -> Result<LibraryRecord> {
        let target = self
            .find(id, path)
            .cloned()
            .ok_or_else(|| CourierError::not_found(format!("library {}", id.or(path).unwrap_or("<none>"))))?;

        if target.missing {
            return Err(CourierError::validation(format!(
                "Library '{}' is missing on disk and cannot be selected",
                target.name
            )));
        }

        let now = Utc::now();
        for library in self.libraries.iter_mut() {
            let active = library.id == target.id;
            if library.active != active {
                library.active = active;
                library.updated_at = now;
            }
        }

        self.selection = Selection {
            path: Some(target.path.clone()),
            name: Some(target.name.clone()),
        };

        Ok(self.get(&target.id).cloned().unwrap_or(target))
    }
}

/// Fold a backend validation into a record.
///
/// Absent on disk: flagged missing, inactive, assets and counts cleared, the
/// standard warning appended. Present: backend assets, counts, warnings and
/// resolved prefix are copied and `missing` cleared. Applying the same
/// validation twice yields the same record.
pub fn apply_validation(record: &LibraryRecord, validation: &LibraryValidation, now: DateTime<Utc>) -> LibraryRecord {
    let mut next = record.clone();
    next.last_validation = Some(now);
    next.updated_at = now;
    next.warnings = validation.warnings.clone();

    if validation.exists {
        next.missing = false;
        next.assets = validation.assets;
        next.counts = validation.counts;
        if let Some(prefix) = &validation.resolved_prefix {
            next.resolved_prefix = Some(prefix.clone());
        }
    } else {
        next.missing = true;
        next.active = false;
        next.assets = Default::default();
        next.counts = AssetCounts::default();
        if !next.warnings.iter().any(|w| w == MISSING_ON_DISK_WARNING) {
            next.warnings.push(MISSING_ON_DISK_WARNING.to_string());
        }
    }

    next
}
