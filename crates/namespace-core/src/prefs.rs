//! PreferenceStore trait for local-only UI state.
//!
//! Values stored here never enter the shared document: each peer keeps its
//! own selection and collapsed folders.
//!
//! Implementations:
//! - `MemoryPreferences` - For testing and headless sessions

use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("Preference storage unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid preference value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, PreferenceError>;

/// Key holding the id of the last opened file in `room`.
pub fn last_selected_key(room: &str) -> String {
    format!("last-selected:{}", room)
}

/// Key holding the JSON array of collapsed folder ids in `room`.
pub fn collapsed_folders_key(room: &str) -> String {
    format!("collapsed-folders:{}", room)
}

/// String key/value storage local to this peer.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory preference store.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .map_err(|e| PreferenceError::Unavailable(e.to_string()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values
            .write()
            .map_err(|e| PreferenceError::Unavailable(e.to_string()))?
            .remove(key);
        Ok(())
    }
}

// Allow Arc<T> to be used where PreferenceStore is expected
impl<T: PreferenceStore> PreferenceStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}
