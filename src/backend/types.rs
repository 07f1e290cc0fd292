// Backend wire types
// Request bodies and responses of the conversion backend. Responses default every
// field so older backends that omit one still decode.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::library::{AssetCounts, AssetFlags};

/// Task status as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// What a finished conversion actually wrote.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskResult {
    pub symbol_path: Option<String>,
    pub footprint_path: Option<String>,
    pub model_paths: BTreeMap<String, String>,
    pub messages: Vec<String>,
}

/// `GET /tasks` entry and the base of `GET /tasks/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSummary {
    pub id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub queue_position: Option<u32>,
    pub error: Option<String>,
    pub created_at: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub result: Option<TaskResult>,
    /// Only echoed by backends that keep the request on the task.
    pub lcsc_id: Option<String>,
    pub output_path: Option<String>,
    /// Present on task detail only.
    pub log: Vec<serde_json::Value>,
}

/// Body of `POST /tasks`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRequest {
    pub lcsc_id: String,
    pub output_path: String,
    pub overwrite: bool,
    pub symbol: bool,
    pub footprint: bool,
    pub model: bool,
    pub overwrite_model: bool,
    pub project_relative: bool,
    pub project_relative_path: Option<String>,
    pub model_path: Option<String>,
}

/// Answer of `POST /libraries/validate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryValidation {
    pub exists: bool,
    pub resolved_prefix: Option<String>,
    pub symbol_path: Option<String>,
    pub footprint_dir: Option<String>,
    pub model_dir: Option<String>,
    pub assets: AssetFlags,
    pub counts: AssetCounts,
    pub warnings: Vec<String>,
}

/// Answer of `POST /libraries/component`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentPresence {
    pub exists: bool,
    pub symbol: bool,
    pub footprint: bool,
    pub model: bool,
}

/// Answer of `POST /libraries/components`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentsPresence {
    pub results: BTreeMap<String, ComponentPresence>,
}

/// Body of `POST /libraries/scaffold`.
#[derive(Debug, Clone, Serialize)]
pub struct ScaffoldRequest {
    pub base_path: String,
    pub library_name: String,
    pub symbol: bool,
    pub footprint: bool,
    pub model: bool,
    pub project_relative: bool,
}

/// Answer of `POST /libraries/scaffold`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaffoldResult {
    pub prefix: Option<String>,
    pub symbol_path: Option<String>,
    pub footprint_dir: Option<String>,
    pub model_dir: Option<String>,
    pub created: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FsRoot {
    pub name: String,
    pub path: String,
}

/// Answer of `GET /fs/roots`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FsRoots {
    pub roots: Vec<FsRoot>,
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FsEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
}

/// Answer of `GET /fs/list?path=`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FsListing {
    pub path: String,
    pub parent: Option<String>,
    pub entries: Vec<FsEntry>,
}

/// Answer of `POST /fs/check`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathCheck {
    pub path: String,
    pub exists: bool,
    pub is_dir: bool,
    pub writable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthStatus {
    pub status: String,
}
