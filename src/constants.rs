// KiCad Courier Constants
// Timings and limits shared by the coordinator, its scheduler and the CLI.

// Paths
pub const APP_DIR: &str = ".kicad-courier";
pub const DB_FILENAME: &str = "state.db";

// Backend
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

// Health monitor
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

// Job polling
pub const POLL_DELAY_QUEUED_MS: u64 = 2000;
pub const POLL_DELAY_RUNNING_MS: u64 = 1200;
pub const POLL_DELAY_MAX_MS: u64 = 30_000;
pub const MAX_POLL_FAILURES: u32 = 20;
pub const STALE_JOB_TIMEOUT_SECS: u64 = 30 * 60;

// History
pub const HISTORY_LIMIT: usize = 30;

// Broadcast channel depth (slow listeners skip to the newest snapshot)
pub const BROADCAST_CAPACITY: usize = 64;

// KiCad library layout
pub const SYMBOL_SUFFIX: &str = ".kicad_sym";
pub const LEGACY_SYMBOL_SUFFIX: &str = ".lib";
pub const FOOTPRINT_SUFFIX: &str = ".pretty";
pub const MODEL_SUFFIX: &str = ".3dshapes";
pub const LIBRARY_SUFFIXES: [&str; 4] = [SYMBOL_SUFFIX, LEGACY_SYMBOL_SUFFIX, FOOTPRINT_SUFFIX, MODEL_SUFFIX];

// Path variable KiCad expands to the project directory
pub const PROJECT_PATH_VARIABLE: &str = "${KIPRJMOD}";

// Characters never allowed in a library display name
pub const FORBIDDEN_NAME_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];
pub const FALLBACK_LIBRARY_NAME: &str = "Library";

// Warnings and messages surfaced to the UI
pub const MISSING_ON_DISK_WARNING: &str = "Library files were not found on disk.";
pub const BACKEND_UNREACHABLE_MESSAGE: &str = "Backend not reachable";
pub const NO_LIBRARY_SELECTED_MESSAGE: &str = "No library selected";
pub const TASK_LOST_MESSAGE: &str = "Task was lost by the backend.";
pub const TASK_UNREACHABLE_MESSAGE: &str = "Gave up polling after repeated backend failures.";
pub const TASK_STALE_MESSAGE: &str = "Task made no progress and was abandoned.";
