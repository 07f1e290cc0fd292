// KiCad Courier - Job Commands
// Conversion submission, status lookups and component checks.

use std::sync::Arc;

use serde_json::Value;

use super::reply;
use crate::coordinator::{Coordinator, JobSubmission};
use crate::jobs::JobOutputs;

/// Submit a conversion; answers with the in-flight record
pub async fn submit_job(coordinator: &Arc<Coordinator>, submission: JobSubmission) -> Result<Value, String> {
    let record = coordinator
        .submit_job(submission)
        .await
        .map_err(|e| e.to_string())?;
    reply(record)
}

pub fn get_job_status(coordinator: &Arc<Coordinator>, id: &str) -> Result<Value, String> {
    let lookup = coordinator.get_job_status(id).map_err(|e| e.to_string())?;
    reply(lookup)
}

pub async fn check_component_exists(
    coordinator: &Arc<Coordinator>,
    lcsc_id: &str,
    library_path: Option<&str>,
) -> Result<Value, String> {
    let status = coordinator
        .check_component_exists(lcsc_id, library_path)
        .await
        .map_err(|e| e.to_string())?;
    reply(status)
}

pub async fn check_components_exist(
    coordinator: &Arc<Coordinator>,
    lcsc_ids: &[String],
    library_path: Option<&str>,
) -> Result<Value, String> {
    let statuses = coordinator
        .check_components_exist(lcsc_ids, library_path)
        .await
        .map_err(|e| e.to_string())?;
    reply(statuses)
}

/// One-click conversion into the selected library
pub async fn quick_download(
    coordinator: &Arc<Coordinator>,
    lcsc_id: &str,
    outputs: Option<JobOutputs>,
) -> Result<Value, String> {
    let record = coordinator
        .quick_download(lcsc_id, outputs)
        .await
        .map_err(|e| e.to_string())?;
    reply(record)
}

pub fn clear_history(coordinator: &Arc<Coordinator>) -> Result<Value, String> {
    coordinator.clear_history().map_err(|e| e.to_string())?;
    Ok(Value::Bool(true))
}
