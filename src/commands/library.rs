// KiCad Courier - Library Commands
// Create, import, validate, edit, remove and select KiCad libraries.

use std::sync::Arc;

use serde_json::{json, Value};

use super::reply;
use crate::coordinator::{Coordinator, LibraryImport, LibraryPatch, NewLibrary};

/// Scaffold a new library through the backend and track it
pub async fn create_library(coordinator: &Arc<Coordinator>, request: NewLibrary) -> Result<Value, String> {
    let record = coordinator
        .create_library(request)
        .await
        .map_err(|e| e.to_string())?;
    reply(record)
}

/// Track an existing library by any of its file paths
pub async fn import_library(coordinator: &Arc<Coordinator>, request: LibraryImport) -> Result<Value, String> {
    let record = coordinator
        .import_library(request)
        .await
        .map_err(|e| e.to_string())?;
    reply(record)
}

pub async fn validate_library(
    coordinator: &Arc<Coordinator>,
    id: Option<&str>,
    path: Option<&str>,
) -> Result<Value, String> {
    coordinator
        .validate_library(id, path)
        .await
        .map_err(|e| e.to_string())
}

pub fn update_library(coordinator: &Arc<Coordinator>, patch: LibraryPatch) -> Result<Value, String> {
    let record = coordinator.update_library(patch).map_err(|e| e.to_string())?;
    reply(record)
}

pub fn remove_library(coordinator: &Arc<Coordinator>, id: &str) -> Result<Value, String> {
    let removed = coordinator.remove_library(id).map_err(|e| e.to_string())?;
    reply(removed)
}

/// Re-validate every library; answers with the refreshed list and totals
pub async fn refresh_libraries(coordinator: &Arc<Coordinator>) -> Result<Value, String> {
    coordinator.refresh_libraries().await.map_err(|e| e.to_string())?;

    let snapshot = coordinator.snapshot();
    Ok(json!({
        "libraries": snapshot.libraries,
        "totals": snapshot.totals,
        "selectedLibraryPath": snapshot.selected_library_path,
    }))
}

pub fn set_selected_library(
    coordinator: &Arc<Coordinator>,
    id: Option<&str>,
    path: Option<&str>,
) -> Result<Value, String> {
    let selected = coordinator
        .set_selected_library(id, path)
        .map_err(|e| e.to_string())?;
    reply(selected)
}
