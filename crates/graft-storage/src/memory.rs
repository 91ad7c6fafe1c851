//! In-memory storage backend

use crate::{matches_pattern, validate_name, Storage, StorageError, StorageStats};
use async_trait::async_trait;
use dashmap::DashMap;
use graft_core::StructureSnapshot;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory storage backend
///
/// Snapshots are kept serialized, so a loaded snapshot never aliases a
/// stored one. Data is lost when the process exits.
pub struct MemoryStorage {
    data: DashMap<String, Vec<u8>>,
    total_size: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            total_size: AtomicUsize::new(0),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save(&self, name: &str, snapshot: &StructureSnapshot) -> Result<(), StorageError> {
        validate_name(name)?;
        let bytes = serde_json::to_vec(snapshot).map_err(|e| StorageError::Serialization(e.to_string()))?;

        if let Some(existing) = self.data.get(name) {
            self.total_size.fetch_sub(existing.len(), Ordering::Relaxed);
        }
        self.total_size.fetch_add(bytes.len(), Ordering::Relaxed);

        self.data.insert(name.to_string(), bytes);
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<StructureSnapshot>, StorageError> {
        match self.data.get(name) {
            Some(entry) => {
                let snapshot = serde_json::from_slice(entry.value())
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        match self.data.remove(name) {
            Some((_, bytes)) => {
                self.total_size.fetch_sub(bytes.len(), Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, pattern: Option<&str>) -> Result<Vec<String>, StorageError> {
        let mut names: Vec<String> = self
            .data
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| pattern.map_or(true, |p| matches_pattern(key, p)))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.data.contains_key(name))
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            structure_count: self.data.len(),
            total_size_bytes: self.total_size.load(Ordering::Relaxed),
        })
    }
}
