//! Graft Storage Backends
//!
//! Persists structure snapshots by name:
//! - Memory: volatile storage for tests and embedding
//! - JSON directory: one pretty-printed file per structure

pub mod json_dir;
pub mod memory;

pub use json_dir::JsonDirStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;
use graft_core::StructureSnapshot;

/// Storage backend trait
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store a structure snapshot under `name`, replacing any previous one
    async fn save(&self, name: &str, snapshot: &StructureSnapshot) -> Result<(), StorageError>;

    /// Load a structure snapshot
    async fn load(&self, name: &str) -> Result<Option<StructureSnapshot>, StorageError>;

    /// Delete a structure snapshot
    async fn delete(&self, name: &str) -> Result<bool, StorageError>;

    /// List stored names matching a pattern, sorted
    async fn list(&self, pattern: Option<&str>) -> Result<Vec<String>, StorageError>;

    async fn exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Get storage statistics
    async fn stats(&self) -> Result<StorageStats, StorageError>;
}

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Structure not found: {0}")]
    NotFound(String),

    #[error("Invalid structure name: {0}")]
    InvalidName(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

impl From<graft_core::Error> for StorageError {
    fn from(e: graft_core::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Storage statistics
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub structure_count: usize,
    pub total_size_bytes: usize,
}

/// Simple glob pattern matching: `*`, `prefix*`, `*suffix` or an exact name
pub(crate) fn matches_pattern(key: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix('*') {
        return key.starts_with(prefix);
    }

    if let Some(suffix) = pattern.strip_prefix('*') {
        return key.ends_with(suffix);
    }

    key == pattern
}

/// Names end up as file names, so they are kept to a safe alphabet
pub(crate) fn validate_name(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}
