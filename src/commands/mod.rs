// KiCad Courier - Commands Module
// Typed requests from UI surfaces, routed to per-domain handlers.
// Handlers return Result<Value, String>; nothing below the dispatcher reaches
// the transport as a panic or a raw error.

pub mod fs;
pub mod jobs;
pub mod library;
pub mod settings;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coordinator::{Coordinator, JobSubmission, LibraryImport, LibraryPatch, NewLibrary};
use crate::jobs::JobOutputs;
use crate::settings::SettingsPatch;

/// Every message kind a surface can send: `{type: <kind>, ...fields}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    GetState,
    UpdateSettings {
        settings: SettingsPatch,
    },
    CreateLibrary(NewLibrary),
    ImportLibrary(LibraryImport),
    ValidateLibrary {
        id: Option<String>,
        path: Option<String>,
    },
    UpdateLibrary(LibraryPatch),
    RemoveLibrary {
        id: String,
    },
    RefreshLibraries,
    SetSelectedLibrary {
        id: Option<String>,
        path: Option<String>,
    },
    SubmitJob(JobSubmission),
    GetJobStatus {
        id: String,
    },
    CheckComponentExists {
        lcsc_id: String,
        library_path: Option<String>,
    },
    CheckComponentsExist {
        lcsc_ids: Vec<String>,
        library_path: Option<String>,
    },
    QuickDownload {
        lcsc_id: String,
        outputs: Option<JobOutputs>,
    },
    ListRoots,
    ListDirectory {
        path: String,
    },
    CheckPath {
        path: String,
    },
    ClearHistory,
}

impl Request {
    /// Requests after which every surface gets a fresh snapshot.
    pub fn mutates(&self) -> bool {
        !matches!(
            self,
            Request::GetState
                | Request::GetJobStatus { .. }
                | Request::CheckComponentExists { .. }
                | Request::CheckComponentsExist { .. }
                | Request::ListRoots
                | Request::ListDirectory { .. }
                | Request::CheckPath { .. }
        )
    }
}

/// Reply envelope: `{ok, data?}` or `{ok: false, error}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn success(data: Value) -> Self {
        Self { ok: true, data: Some(data), error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { ok: false, data: None, error: Some(error.into()) }
    }
}

impl From<Result<Value, String>> for Response {
    fn from(result: Result<Value, String>) -> Self {
        match result {
            Ok(data) => Response::success(data),
            Err(error) => Response::failure(error),
        }
    }
}

/// Serialize a handler's answer.
pub(crate) fn reply<T: Serialize>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

/// Initialize on first use, run the handler, broadcast after mutations.
pub async fn dispatch(coordinator: &Arc<Coordinator>, request: Request) -> Response {
    if let Err(e) = coordinator.ensure_initialized().await {
        log::error!("Coordinator initialization failed: {}", e);
        return Response::failure(e.to_string());
    }

    let mutates = request.mutates();
    let result = route(coordinator, request).await;
    if let Err(e) = &result {
        log::debug!("Request failed: {}", e);
    }
    if mutates {
        coordinator.broadcast_state();
    }
    result.into()
}

async fn route(coordinator: &Arc<Coordinator>, request: Request) -> Result<Value, String> {
    match request {
        Request::GetState => settings::get_state(coordinator),
        Request::UpdateSettings { settings: patch } => settings::update_settings(coordinator, patch).await,
        Request::CreateLibrary(payload) => library::create_library(coordinator, payload).await,
        Request::ImportLibrary(payload) => library::import_library(coordinator, payload).await,
        Request::ValidateLibrary { id, path } => {
            library::validate_library(coordinator, id.as_deref(), path.as_deref()).await
        }
        Request::UpdateLibrary(patch) => library::update_library(coordinator, patch),
        Request::RemoveLibrary { id } => library::remove_library(coordinator, &id),
        Request::RefreshLibraries => library::refresh_libraries(coordinator).await,
        Request::SetSelectedLibrary { id, path } => {
            library::set_selected_library(coordinator, id.as_deref(), path.as_deref())
        }
        Request::SubmitJob(submission) => jobs::submit_job(coordinator, submission).await,
        Request::GetJobStatus { id } => jobs::get_job_status(coordinator, &id),
        Request::CheckComponentExists { lcsc_id, library_path } => {
            jobs::check_component_exists(coordinator, &lcsc_id, library_path.as_deref()).await
        }
        Request::CheckComponentsExist { lcsc_ids, library_path } => {
            jobs::check_components_exist(coordinator, &lcsc_ids, library_path.as_deref()).await
        }
        Request::QuickDownload { lcsc_id, outputs } => jobs::quick_download(coordinator, &lcsc_id, outputs).await,
        Request::ListRoots => fs::list_roots(coordinator).await,
        Request::ListDirectory { path } => fs::list_directory(coordinator, &path).await,
        Request::CheckPath { path } => fs::check_path(coordinator, &path).await,
        Request::ClearHistory => jobs::clear_history(coordinator),
    }
}
