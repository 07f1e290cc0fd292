// Job system module
// In-flight conversion jobs, their persisted recovery metadata and the bounded
// history of finished jobs.

pub mod analysis;
pub mod scheduler;

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::{TaskResult, TaskStatus, TaskSummary};
use crate::constants::HISTORY_LIMIT;
use crate::error::{CourierError, Result};

pub use analysis::ComponentOutputAnalysis;
pub use scheduler::PollScheduler;

static LCSC_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^C\d+$").unwrap());

/// Normalize an LCSC part number to uppercase `C` + digits.
pub fn normalize_lcsc_id(raw: &str) -> Result<String> {
    let id = raw.trim().to_ascii_uppercase();
    if id.is_empty() {
        return Err(CourierError::validation("LCSC ID is required"));
    }
    if !LCSC_ID.is_match(&id) {
        return Err(CourierError::validation(format!(
            "Invalid LCSC ID '{}': expected 'C' followed by digits",
            raw.trim()
        )));
    }
    Ok(id)
}

/// Which artifacts a job was asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOutputs {
    pub symbol: bool,
    pub footprint: bool,
    pub model: bool,
}

impl Default for JobOutputs {
    fn default() -> Self {
        Self { symbol: true, footprint: true, model: true }
    }
}

impl JobOutputs {
    pub fn any(&self) -> bool {
        self.symbol || self.footprint || self.model
    }

    /// Requested kinds in display order.
    pub fn requested(&self) -> Vec<&'static str> {
        let mut kinds = Vec::with_capacity(3);
        if self.symbol {
            kinds.push("symbol");
        }
        if self.footprint {
            kinds.push("footprint");
        }
        if self.model {
            kinds.push("model");
        }
        kinds
    }
}

/// Locally known facts about a job the backend does not echo back.
/// Persisted so an in-flight job can be re-adopted after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMeta {
    pub lcsc_id: String,
    pub library_name: String,
    pub library_path: String,
    #[serde(default)]
    pub outputs: JobOutputs,
    pub submitted_at: DateTime<Utc>,
}

/// A job the backend has not finished yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub lcsc_id: String,
    pub library_name: String,
    pub library_path: String,
    pub outputs: JobOutputs,
    pub status: TaskStatus,
    pub progress: u8,
    pub result: Option<TaskResult>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub queue_position: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Build a record from a backend task. Local metadata wins for the fields
    /// it owns; everything else mirrors the backend.
    pub fn from_task(task: &TaskSummary, meta: Option<&JobMeta>) -> Self {
        let now = Utc::now();
        let created_at = meta
            .map(|m| m.submitted_at)
            .or_else(|| parse_backend_time(task.created_at.as_deref()))
            .unwrap_or(now);

        Self {
            id: task.id.clone(),
            lcsc_id: meta
                .map(|m| m.lcsc_id.clone())
                .or_else(|| task.lcsc_id.clone())
                .unwrap_or_default(),
            library_name: meta.map(|m| m.library_name.clone()).unwrap_or_default(),
            library_path: meta
                .map(|m| m.library_path.clone())
                .or_else(|| task.output_path.clone())
                .unwrap_or_default(),
            outputs: meta.map(|m| m.outputs).unwrap_or_default(),
            status: task.status,
            progress: task.progress.min(100),
            result: task.result.clone(),
            message: task.message.clone(),
            error: task.error.clone(),
            queue_position: task.queue_position,
            created_at,
            updated_at: now,
        }
    }

    /// Rebuild a job from persisted metadata alone (backend no longer knows it).
    pub fn from_meta(id: &str, meta: &JobMeta) -> Self {
        Self {
            id: id.to_string(),
            lcsc_id: meta.lcsc_id.clone(),
            library_name: meta.library_name.clone(),
            library_path: meta.library_path.clone(),
            outputs: meta.outputs,
            status: TaskStatus::Queued,
            progress: 0,
            result: None,
            message: None,
            error: None,
            queue_position: None,
            created_at: meta.submitted_at,
            updated_at: Utc::now(),
        }
    }

    /// Refresh backend-owned fields from a newer task payload.
    pub fn apply_task(&mut self, task: &TaskSummary) {
        self.status = task.status;
        self.progress = task.progress.min(100);
        self.message = task.message.clone();
        self.error = task.error.clone();
        self.queue_position = task.queue_position;
        if task.result.is_some() {
            self.result = task.result.clone();
        }
        self.updated_at = Utc::now();
    }

    pub fn meta(&self) -> JobMeta {
        JobMeta {
            lcsc_id: self.lcsc_id.clone(),
            library_name: self.library_name.clone(),
            library_path: self.library_path.clone(),
            outputs: self.outputs,
            submitted_at: self.created_at,
        }
    }
}

/// Terminal snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHistoryEntry {
    pub id: String,
    pub lcsc_id: String,
    pub library_name: String,
    pub library_path: String,
    #[serde(default)]
    pub outputs: JobOutputs,
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub log: Vec<Value>,
}

impl JobHistoryEntry {
    pub fn from_record(record: JobRecord, log: Vec<Value>, finished_at: DateTime<Utc>) -> Self {
        Self {
            id: record.id,
            lcsc_id: record.lcsc_id,
            library_name: record.library_name,
            library_path: record.library_path,
            outputs: record.outputs,
            status: record.status,
            progress: record.progress,
            result: record.result,
            message: record.message,
            error: record.error,
            created_at: record.created_at,
            finished_at,
            log,
        }
    }

    /// Record a job as failed locally (lost, unreachable or stale).
    pub fn abandoned(mut record: JobRecord, reason: &str) -> Self {
        let now = Utc::now();
        record.status = TaskStatus::Failed;
        record.error = Some(reason.to_string());
        record.message = Some(reason.to_string());
        Self::from_record(record, Vec::new(), now)
    }

    pub fn analysis(&self) -> ComponentOutputAnalysis {
        ComponentOutputAnalysis::compute(&self.outputs, self.result.as_ref())
    }
}

/// History entry as shown to UI surfaces, with the derived output analysis.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryView {
    #[serde(flatten)]
    pub entry: JobHistoryEntry,
    pub output_analysis: ComponentOutputAnalysis,
}

impl From<&JobHistoryEntry> for HistoryView {
    fn from(entry: &JobHistoryEntry) -> Self {
        Self {
            output_analysis: entry.analysis(),
            entry: entry.clone(),
        }
    }
}

/// Insert newest-first. An id already present is replaced and moved to the
/// front; the list never grows past the history limit.
pub fn insert_history(history: &mut Vec<JobHistoryEntry>, entry: JobHistoryEntry) {
    history.retain(|existing| existing.id != entry.id);
    history.insert(0, entry);
    history.truncate(HISTORY_LIMIT);
}

/// Backend timestamps are ISO 8601, with or without an offset.
pub fn parse_backend_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
