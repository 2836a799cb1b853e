use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use serde::Serialize;

use crate::error::PersistenceError;

static FILE_SUFFIX_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Per-user application directory; all persisted state lives under it.
pub fn app_data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("buddybar")
}

pub fn truncate_message(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }

    let truncated: String = input.chars().take(max_chars).collect();
    format!("{truncated}...")
}

pub(crate) fn unique_time_suffix() -> u64 {
    FILE_SUFFIX_COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn restrict_file_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        if path.exists() {
            if let Err(error) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
                tracing::debug!(?path, %error, "failed to restrict file permissions");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

/// Write JSON through a temp file and rename, so readers never observe a
/// partial file.
pub(crate) fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let content = serde_json::to_string_pretty(value).map_err(|source| {
        PersistenceError::Encode {
            path: path.to_path_buf(),
            source,
        }
    })?;
    let tmp_path = path.with_extension(format!("tmp-{}", unique_time_suffix()));
    fs::write(&tmp_path, content).map_err(|source| PersistenceError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    restrict_file_permissions(&tmp_path);
    fs::rename(&tmp_path, path).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Move a file that failed to parse out of the way so the next write starts
/// fresh, keeping the bad bytes around for inspection.
pub(crate) fn quarantine_corrupt_file(path: &Path) {
    let backup_path = path.with_extension(format!("corrupt-{}", unique_time_suffix()));
    match fs::rename(path, &backup_path) {
        Ok(()) => tracing::warn!(
            "moved corrupt file to {}",
            backup_path.to_string_lossy()
        ),
        Err(error) => tracing::warn!(%error, "failed to back up corrupt file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_input() {
        assert_eq!(truncate_message("hello", 10), "hello");
    }

    #[test]
    fn truncate_appends_ellipsis() {
        assert_eq!(truncate_message("hello world", 5), "hello...");
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        write_json_atomic(&path, &serde_json::json!({"a": 1})).unwrap();
        write_json_atomic(&path, &serde_json::json!({"a": 2})).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["a"], 2);
        // No stray temp files left behind.
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
