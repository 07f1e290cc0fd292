// KiCad Courier - Settings Commands
// Snapshot reads and persisted settings updates.

use std::sync::Arc;

use serde_json::Value;

use super::reply;
use crate::coordinator::Coordinator;
use crate::settings::SettingsPatch;

/// Full state snapshot
pub fn get_state(coordinator: &Arc<Coordinator>) -> Result<Value, String> {
    reply(coordinator.snapshot())
}

/// Apply a partial settings patch and return the saved settings
pub async fn update_settings(coordinator: &Arc<Coordinator>, patch: SettingsPatch) -> Result<Value, String> {
    let settings = coordinator
        .update_settings(patch)
        .await
        .map_err(|e| e.to_string())?;
    reply(settings)
}
