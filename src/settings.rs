// Persisted operator settings
// Every field defaults, so older snapshots missing a key still load.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_BACKEND_URL;
use crate::jobs::JobOutputs;
use crate::library::paths;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub backend_url: String,
    pub default_outputs: JobOutputs,
    pub overwrite: bool,
    pub overwrite_model: bool,
    pub project_relative: bool,
    pub project_relative_path: String,
    pub notifications: bool,
    /// Single-library layout from before the inventory existed. Cleared once migrated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_name: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            default_outputs: JobOutputs::default(),
            overwrite: false,
            overwrite_model: false,
            project_relative: false,
            project_relative_path: String::new(),
            notifications: true,
            library_path: None,
            library_name: None,
        }
    }
}

/// Partial update sent by `updateSettings`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    pub backend_url: Option<String>,
    pub default_outputs: Option<JobOutputs>,
    pub overwrite: Option<bool>,
    pub overwrite_model: Option<bool>,
    pub project_relative: Option<bool>,
    pub project_relative_path: Option<String>,
    pub notifications: Option<bool>,
}

impl Settings {
    /// Apply a patch. Returns true when the backend URL changed.
    pub fn apply(&mut self, patch: SettingsPatch) -> bool {
        let mut backend_changed = false;

        if let Some(url) = patch.backend_url {
            let url = url.trim().trim_end_matches('/').to_string();
            let url = if url.is_empty() { DEFAULT_BACKEND_URL.to_string() } else { url };
            backend_changed = url != self.backend_url;
            self.backend_url = url;
        }
        if let Some(outputs) = patch.default_outputs {
            self.default_outputs = outputs;
        }
        if let Some(v) = patch.overwrite {
            self.overwrite = v;
        }
        if let Some(v) = patch.overwrite_model {
            self.overwrite_model = v;
        }
        if let Some(v) = patch.project_relative {
            self.project_relative = v;
        }
        if let Some(path) = patch.project_relative_path {
            self.project_relative_path = paths::normalize_project_relative_path(&path);
        }
        if let Some(v) = patch.notifications {
            self.notifications = v;
        }

        backend_changed
    }

    /// Take the legacy single-library fields, leaving them cleared.
    pub fn take_legacy_library(&mut self) -> Option<(String, Option<String>)> {
        let path = self.library_path.take().filter(|p| !p.trim().is_empty());
        let name = self.library_name.take();
        path.map(|p| (p, name))
    }
}
