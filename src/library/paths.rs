// Library path canonicalization
// Every library is keyed by its canonical prefix: the path without trailing
// separators and without any KiCad library suffix, so `/a/b/lib.kicad_sym`,
// `/a/b/lib.pretty/` and `/a/b/lib` all name the same library.

use std::sync::LazyLock;

use regex::Regex;

use crate::constants::{
    FALLBACK_LIBRARY_NAME, FORBIDDEN_NAME_CHARS, LIBRARY_SUFFIXES, MODEL_SUFFIX,
    PROJECT_PATH_VARIABLE, SYMBOL_SUFFIX,
};

static REPEATED_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/{2,}").unwrap());
static CURRENT_DIR_SEGMENTS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/(\./)+").unwrap());
static PROJECT_VARIABLE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\$\{KIPRJMOD\}|\$KIPRJMOD)/*").unwrap());

/// Trimmed value, or `None` when absent or blank.
pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Normalize separators: backslashes become `/`, runs of `/` collapse, `/./` disappears.
pub fn normalize_path(raw: &str) -> String {
    let unified = raw.trim().replace('\\', "/");
    let collapsed = REPEATED_SEPARATORS.replace_all(&unified, "/");
    CURRENT_DIR_SEGMENTS.replace_all(&collapsed, "/").into_owned()
}

fn trim_trailing_separators(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}

/// Canonical library prefix used as the identity key.
pub fn canonical_prefix(raw: &str) -> String {
    let normalized = normalize_path(raw);
    let mut prefix = trim_trailing_separators(&normalized).to_string();

    let lower = prefix.to_ascii_lowercase();
    if let Some(suffix) = LIBRARY_SUFFIXES.iter().find(|s| lower.ends_with(*s)) {
        if prefix.len() > suffix.len() {
            prefix.truncate(prefix.len() - suffix.len());
        }
    }

    trim_trailing_separators(&prefix).to_string()
}

/// True when both inputs name the same library.
pub fn same_library(a: &str, b: &str) -> bool {
    canonical_prefix(a) == canonical_prefix(b)
}

/// Directory holding the library files (`/a/b` for `/a/b/lib`).
pub fn base_path(prefix: &str) -> String {
    match prefix.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => prefix[..idx].to_string(),
        None => String::new(),
    }
}

/// Last path segment of a prefix.
pub fn prefix_stem(prefix: &str) -> &str {
    prefix.rsplit('/').next().unwrap_or(prefix)
}

pub fn symbol_path(prefix: &str) -> String {
    format!("{}{}", prefix, SYMBOL_SUFFIX)
}

/// Strip characters KiCad cannot use in a library nickname. Falls back to the
/// prefix stem, then to a fixed name.
pub fn sanitize_library_name(name: Option<&str>, prefix: &str) -> String {
    let clean = |raw: &str| -> String {
        raw.chars()
            .filter(|c| !FORBIDDEN_NAME_CHARS.contains(c))
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    };

    let from_name = name.map(clean).unwrap_or_default();
    if !from_name.is_empty() {
        return from_name;
    }

    let from_prefix = clean(prefix_stem(prefix));
    if !from_prefix.is_empty() {
        return from_prefix;
    }

    FALLBACK_LIBRARY_NAME.to_string()
}

/// Normalize a project-relative location and drop a leading `${KIPRJMOD}`.
pub fn normalize_project_relative_path(raw: &str) -> String {
    let normalized = normalize_path(raw);
    let stripped = PROJECT_VARIABLE_PREFIX.replace(&normalized, "");
    let stripped = stripped.trim_start_matches("./").trim_start_matches('/');
    stripped.trim_end_matches('/').to_string()
}

/// Model path as KiCad should see it for a project-relative library.
pub fn project_model_path(relative: &str, prefix: &str) -> String {
    let dir = format!("{}{}", prefix_stem(prefix), MODEL_SUFFIX);
    if relative.is_empty() {
        format!("{}/{}", PROJECT_PATH_VARIABLE, dir)
    } else {
        format!("{}/{}/{}", PROJECT_PATH_VARIABLE, relative, dir)
    }
}
