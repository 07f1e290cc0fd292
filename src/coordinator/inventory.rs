// Library inventory reconciler
// Library operations that need the backend: validation, scaffolding, refresh.
// Each one awaits the backend first, then merges under the lock.

use chrono::Utc;
use serde::Deserialize;

use super::{Coordinator, LIBRARY_KEYS};
use crate::backend::{LibraryValidation, ScaffoldRequest};
use crate::error::{CourierError, Result};
use crate::library::inventory::apply_validation;
use crate::library::paths::{self, non_empty};
use crate::library::LibraryRecord;

/// `createLibrary` payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewLibrary {
    pub base_path: String,
    pub name: String,
    pub symbol: bool,
    pub footprint: bool,
    pub model: bool,
    pub project_relative: bool,
    pub project_relative_path: Option<String>,
    pub select: Option<bool>,
}

/// `importLibrary` payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LibraryImport {
    pub path: String,
    pub name: Option<String>,
    pub project_relative: Option<bool>,
    pub project_relative_path: Option<String>,
    pub model_path: Option<String>,
    pub select: Option<bool>,
}

/// `updateLibrary` payload. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LibraryPatch {
    pub id: String,
    pub name: Option<String>,
    pub project_relative: Option<bool>,
    pub project_relative_path: Option<String>,
    /// Empty string clears the override.
    pub model_path: Option<String>,
    pub project_id: Option<String>,
    pub active: Option<bool>,
}

impl Coordinator {
    /// Ask the backend about a path. Nothing is merged.
    pub async fn validate_path(&self, path: &str) -> Result<LibraryValidation> {
        let prefix = paths::canonical_prefix(path);
        if prefix.is_empty() {
            return Err(CourierError::validation("Library path is required"));
        }
        self.backend()
            .validate_library(&prefix)
            .await
            .map_err(|e| self.note_backend_error(e))
    }

    /// Validate a record and merge the result into the inventory. A record
    /// removed while the backend call was pending is not resurrected.
    pub async fn validate_and_merge(&self, record: &LibraryRecord) -> Result<LibraryRecord> {
        let validation = self.validate_path(&record.path).await?;

        let mut state = self.lock();
        let current = state.inventory.find(Some(&record.id), Some(&record.path)).cloned();
        match current {
            Some(current) => {
                let validated = apply_validation(&current, &validation, Utc::now());
                Ok(state.inventory.upsert(validated).record)
            }
            None => Ok(apply_validation(record, &validation, Utc::now())),
        }
    }

    /// Validate, tolerating an offline backend (the record stays unvalidated).
    async fn validate_if_online(&self, record: LibraryRecord) -> Result<LibraryRecord> {
        match self.validate_and_merge(&record).await {
            Ok(validated) => Ok(validated),
            Err(e) if e.is_offline() => {
                log::info!("Backend offline, '{}' will be validated on reconnect", record.path);
                Ok(record)
            }
            Err(e) => Err(e),
        }
    }

    /// `validateLibrary`: merge when the library is tracked, otherwise return
    /// the backend's raw answer.
    pub async fn validate_library(&self, id: Option<&str>, path: Option<&str>) -> Result<serde_json::Value> {
        let tracked = self.lock().inventory.find(id, path).cloned();
        match tracked {
            Some(record) => {
                let merged = self.validate_and_merge(&record).await?;
                self.after_library_change()?;
                Ok(serde_json::to_value(merged)?)
            }
            None => {
                let path = non_empty(path).ok_or_else(|| match id {
                    Some(id) => CourierError::not_found(format!("library {}", id)),
                    None => CourierError::validation("Library path is required"),
                })?;
                Ok(serde_json::to_value(self.validate_path(path).await?)?)
            }
        }
    }

    /// Re-validate every library. Stops at the first transport failure.
    pub async fn refresh_libraries(&self) -> Result<()> {
        let records = self.lock().inventory.libraries().to_vec();
        log::debug!("Refreshing {} libraries", records.len());

        for record in &records {
            match self.validate_and_merge(record).await {
                Ok(validated) if validated.missing && !record.missing => {
                    log::warn!("Library '{}' is missing on disk: {}", validated.name, validated.path);
                }
                Ok(_) => {}
                Err(e) if e.is_offline() => {
                    self.after_library_change()?;
                    return Err(e);
                }
                Err(e) => log::warn!("Validation of '{}' failed: {}", record.path, e),
            }
        }

        self.after_library_change()
    }

    /// Re-validate the library a completed job wrote into.
    pub(crate) async fn revalidate_library_path(&self, path: &str) {
        let record = self.lock().inventory.find_by_path(path).cloned();
        let Some(record) = record else {
            log::debug!("Finished job targeted untracked library {}", path);
            return;
        };
        if let Err(e) = self.validate_and_merge(&record).await {
            log::warn!("Re-validation of '{}' failed: {}", record.path, e);
        }
        if let Err(e) = self.after_library_change() {
            log::error!("Failed to persist libraries: {}", e);
        }
    }

    /// Re-elect the selection and persist library keys. Call after every
    /// structural change to the library list.
    pub(crate) fn after_library_change(&self) -> Result<()> {
        self.lock().inventory.ensure_selected(false);
        self.persist(&LIBRARY_KEYS)
    }

    /// `createLibrary`: scaffold the files through the backend, then track them.
    pub async fn create_library(&self, request: NewLibrary) -> Result<LibraryRecord> {
        let base_path = paths::normalize_path(&request.base_path);
        let base_path = base_path.trim_end_matches('/');
        if base_path.is_empty() {
            return Err(CourierError::validation("Base path is required"));
        }
        if request.name.trim().is_empty() {
            return Err(CourierError::validation("Library name is required"));
        }
        if !(request.symbol || request.footprint || request.model) {
            return Err(CourierError::validation("Select at least one asset type to create"));
        }

        let name = paths::sanitize_library_name(Some(&request.name), "");
        let scaffold = ScaffoldRequest {
            base_path: base_path.to_string(),
            library_name: name.clone(),
            symbol: request.symbol,
            footprint: request.footprint,
            model: request.model,
            project_relative: request.project_relative,
        };
        let result = self
            .backend()
            .scaffold_library(&scaffold)
            .await
            .map_err(|e| self.note_backend_error(e))?;

        let prefix = result
            .prefix
            .clone()
            .unwrap_or_else(|| format!("{}/{}", base_path, name));
        let mut record = LibraryRecord::new(&prefix, Some(&name));
        if request.project_relative {
            let relative = request
                .project_relative_path
                .clone()
                .unwrap_or_else(|| self.lock().settings.project_relative_path.clone());
            record = record.with_project_relative(Some(&relative));
        }
        record.warnings = result.warnings.clone();
        log::info!("Scaffolded library '{}' at {} ({} items created)", name, record.path, result.created.len());

        self.track_library(record, request.select.unwrap_or(false)).await
    }

    /// `importLibrary`: track an existing library by any of its file paths.
    pub async fn import_library(&self, request: LibraryImport) -> Result<LibraryRecord> {
        let path = non_empty(Some(&request.path))
            .ok_or_else(|| CourierError::validation("Library path is required"))?;

        let mut record = LibraryRecord::new(path, non_empty(request.name.as_deref()));
        if let Some(existing) = self.lock().inventory.find_by_path(&record.path) {
            // Same library under another suffix: keep its identity
            record.id = existing.id.clone();
            record.created_at = existing.created_at;
            record.active = existing.active;
            if non_empty(request.name.as_deref()).is_none() {
                record.name = existing.name.clone();
            }
        }

        if let Some(model_path) = non_empty(request.model_path.as_deref()) {
            record.model_path = Some(paths::normalize_path(model_path));
        }
        if request.project_relative.unwrap_or(false) {
            record = record.with_project_relative(request.project_relative_path.as_deref());
        }

        self.track_library(record, request.select.unwrap_or(false)).await
    }

    async fn track_library(&self, record: LibraryRecord, select: bool) -> Result<LibraryRecord> {
        let upserted = self.lock().inventory.upsert(record);
        if upserted.created {
            log::info!("Tracking library '{}' at {}", upserted.record.name, upserted.record.path);
        }

        let validated = self.validate_if_online(upserted.record).await?;

        if select && !validated.missing {
            self.lock().inventory.select(Some(&validated.id), None)?;
        }
        self.after_library_change()?;

        let current = self.lock().inventory.get(&validated.id).cloned();
        Ok(current.unwrap_or(validated))
    }

    /// `updateLibrary`
    pub fn update_library(&self, patch: LibraryPatch) -> Result<LibraryRecord> {
        let updated = {
            let mut state = self.lock();
            let mut record = state
                .inventory
                .get(&patch.id)
                .cloned()
                .ok_or_else(|| CourierError::not_found(format!("library {}", patch.id)))?;

            if let Some(name) = patch.name.as_deref() {
                record.name = paths::sanitize_library_name(Some(name), &record.path);
            }
            if let Some(relative) = patch.project_relative_path.as_deref() {
                record.project_relative_path = paths::normalize_project_relative_path(relative);
            }
            match patch.project_relative {
                Some(true) if !record.project_relative => {
                    let relative = record.project_relative_path.clone();
                    record = record.with_project_relative(Some(&relative));
                }
                Some(false) => record.project_relative = false,
                _ => {}
            }
            if let Some(model_path) = patch.model_path.as_deref() {
                record.model_path = non_empty(Some(model_path)).map(paths::normalize_path);
            }
            if let Some(project_id) = patch.project_id.as_deref() {
                record.project_id = non_empty(Some(project_id)).map(str::to_string);
            }
            if patch.active == Some(false) {
                record.active = false;
            }
            record.updated_at = Utc::now();

            let record = state.inventory.upsert(record).record;
            if patch.active == Some(true) {
                state.inventory.select(Some(&record.id), None)?
            } else {
                record
            }
        };

        self.after_library_change()?;
        let current = self.lock().inventory.get(&updated.id).cloned();
        Ok(current.unwrap_or(updated))
    }

    /// `removeLibrary`: drop a record; the first remaining library takes over
    /// when the active one goes.
    pub fn remove_library(&self, id: &str) -> Result<LibraryRecord> {
        let removed = self
            .lock()
            .inventory
            .remove(id)
            .ok_or_else(|| CourierError::not_found(format!("library {}", id)))?;
        log::info!("Removed library '{}' ({})", removed.name, removed.path);
        self.after_library_change()?;
        Ok(removed)
    }

    /// `setSelectedLibrary`: explicit user choice.
    pub fn set_selected_library(&self, id: Option<&str>, path: Option<&str>) -> Result<LibraryRecord> {
        if non_empty(id).is_none() && non_empty(path).is_none() {
            return Err(CourierError::validation("Library id or path is required"));
        }
        let selected = self.lock().inventory.select(non_empty(id), non_empty(path))?;
        self.persist(&LIBRARY_KEYS)?;
        Ok(selected)
    }
}
