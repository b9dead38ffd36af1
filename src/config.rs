//! Configuration for the sidecar family.
//!
//! The only environment contract is the models directory root used by the
//! downloader: `LATERAL_MODELS_DIR` overrides, otherwise
//! `<home>/.lateral/models`.

use std::path::PathBuf;

/// Environment variable overriding the models directory.
pub const MODELS_DIR_ENV: &str = "LATERAL_MODELS_DIR";

/// Resolve the directory where downloaded model artifacts live.
///
/// Falls back to the current directory when no home directory can be
/// determined (containers without $HOME).
pub fn models_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(MODELS_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lateral")
        .join("models")
}

/// Directory name a repo id maps to on disk (`org/name` -> `org--name`).
pub fn repo_dir_name(repo_id: &str) -> String {
    repo_id.replace('/', "--")
}
