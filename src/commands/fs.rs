// KiCad Courier - Filesystem Commands
// Directory browsing on the backend host, used by library pickers.

use std::sync::Arc;

use serde_json::Value;

use super::reply;
use crate::coordinator::Coordinator;

pub async fn list_roots(coordinator: &Arc<Coordinator>) -> Result<Value, String> {
    let roots = coordinator.list_roots().await.map_err(|e| e.to_string())?;
    reply(roots)
}

pub async fn list_directory(coordinator: &Arc<Coordinator>, path: &str) -> Result<Value, String> {
    let listing = coordinator
        .list_directory(path)
        .await
        .map_err(|e| e.to_string())?;
    reply(listing)
}

pub async fn check_path(coordinator: &Arc<Coordinator>, path: &str) -> Result<Value, String> {
    let check = coordinator.check_path(path).await.map_err(|e| e.to_string())?;
    reply(check)
}
