use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

use crate::{
    consts::{
        DEFAULT_BASE_URL, DEFAULT_BUBBLE_BASE_OFFSET, DEFAULT_BUBBLE_GAP, DEFAULT_BUBBLE_SIZE,
        DEFAULT_MAX_BUBBLES, DEFAULT_POLL_INTERVAL_MS,
    },
    core::{quarantine_corrupt_file, write_json_atomic},
    error::PersistenceError,
    model::ContactEntry,
};

/// Screen edge the bubbles stack along.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BubbleEdge {
    Left,
    Right,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub base_url: String,
    pub poll_interval_ms: u64,
    pub notifications_enabled: bool,
    pub bubble_edge: BubbleEdge,
    pub bubble_size: u32,
    pub bubble_gap: u32,
    pub bubble_base_offset: u32,
    pub max_bubbles: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            notifications_enabled: true,
            bubble_edge: BubbleEdge::Right,
            bubble_size: DEFAULT_BUBBLE_SIZE,
            bubble_gap: DEFAULT_BUBBLE_GAP,
            bubble_base_offset: DEFAULT_BUBBLE_BASE_OFFSET,
            max_bubbles: DEFAULT_MAX_BUBBLES,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
struct StoredConfig {
    settings: Settings,
    whitelist: Vec<ContactEntry>,
}

/// Persisted tunables plus the contact allow-list, backed by one JSON file.
/// The store is the single writer of that file; all reads go through the
/// in-memory copy loaded at startup.
pub struct SettingsStore {
    path: PathBuf,
    inner: Mutex<StoredConfig>,
}

impl SettingsStore {
    /// Load the store, falling back to defaults when the file is missing and
    /// quarantining it when it fails to parse.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = read_config(&path);
        Self {
            path,
            inner: Mutex::new(config),
        }
    }

    pub fn settings(&self) -> Settings {
        self.lock().settings.clone()
    }

    /// Apply a mutation to the settings and persist the result.
    pub fn update_settings(
        &self,
        apply: impl FnOnce(&mut Settings),
    ) -> Result<(), PersistenceError> {
        let snapshot = {
            let mut inner = self.lock();
            apply(&mut inner.settings);
            inner.clone()
        };
        write_json_atomic(&self.path, &snapshot)
    }

    pub fn whitelist(&self) -> Vec<ContactEntry> {
        self.lock().whitelist.clone()
    }

    pub fn contact(&self, user_id: &str) -> Option<ContactEntry> {
        self.lock()
            .whitelist
            .iter()
            .find(|c| c.user_id == user_id)
            .cloned()
    }

    pub fn is_whitelisted(&self, user_id: &str) -> bool {
        self.lock().whitelist.iter().any(|c| c.user_id == user_id)
    }

    /// Add a contact, replacing any existing entry with the same user id.
    pub fn add_contact(&self, entry: ContactEntry) -> Result<(), PersistenceError> {
        let snapshot = {
            let mut inner = self.lock();
            inner.whitelist.retain(|c| c.user_id != entry.user_id);
            inner.whitelist.push(entry);
            inner.clone()
        };
        write_json_atomic(&self.path, &snapshot)
    }

    pub fn remove_contact(&self, user_id: &str) -> Result<(), PersistenceError> {
        let snapshot = {
            let mut inner = self.lock();
            inner.whitelist.retain(|c| c.user_id != user_id);
            inner.clone()
        };
        write_json_atomic(&self.path, &snapshot)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoredConfig> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn read_config(path: &Path) -> StoredConfig {
    if !path.exists() {
        return StoredConfig::default();
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) => {
            tracing::warn!(%error, ?path, "failed to read settings, using defaults");
            return StoredConfig::default();
        }
    };

    match serde_json::from_str::<StoredConfig>(&content) {
        Ok(config) => config,
        Err(error) => {
            tracing::warn!(%error, "settings parse failed, starting fresh");
            quarantine_corrupt_file(path);
            StoredConfig::default()
        }
    }
}
