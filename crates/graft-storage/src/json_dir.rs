//! JSON directory backend: one `<name>.json` file per structure

use crate::{matches_pattern, validate_name, Storage, StorageError, StorageStats};
use async_trait::async_trait;
use graft_core::StructureSnapshot;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const EXTENSION: &str = "json";

pub struct JsonDirStorage {
    root: PathBuf,
}

impl JsonDirStorage {
    /// Open a storage directory, creating it if needed
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        debug!(path = %root.display(), "Opened JSON storage");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_name(name)?;
        Ok(self.root.join(format!("{}.{}", name, EXTENSION)))
    }

    async fn names(&self) -> Result<Vec<(String, u64)>, StorageError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                let size = entry.metadata().await?.len();
                names.push((stem.to_string(), size));
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl Storage for JsonDirStorage {
    async fn save(&self, name: &str, snapshot: &StructureSnapshot) -> Result<(), StorageError> {
        let path = self.path(name)?;
        let json = snapshot.to_json()?;

        // write next to the target and rename, so readers never see half a file
        let partial = path.with_extension("json.partial");
        fs::write(&partial, json.as_bytes()).await?;
        fs::rename(&partial, &path).await?;

        debug!(structure = name, bytes = json.len(), "Saved snapshot");
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<StructureSnapshot>, StorageError> {
        let path = self.path(name)?;
        match fs::read_to_string(&path).await {
            Ok(json) => Ok(Some(StructureSnapshot::from_json(&json)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.path(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, pattern: Option<&str>) -> Result<Vec<String>, StorageError> {
        Ok(self
            .names()
            .await?
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| pattern.map_or(true, |p| matches_pattern(name, p)))
            .collect())
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.path(name)?).await?)
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        let names = self.names().await?;
        Ok(StorageStats {
            structure_count: names.len(),
            total_size_bytes: names.iter().map(|(_, size)| *size as usize).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_core::{ContentNode, CorpusStructure, DocumentGraph, Relation};

    fn snapshot(name: &str) -> StructureSnapshot {
        let structure = CorpusStructure::new(name);
        let (doc, _) = structure.ensure_document_path("corpus/sub/doc").unwrap();
        let mut graph = DocumentGraph::new();
        let ds = graph.add_text("Hallo Welt");
        let token = graph.add_node(ContentNode::token().with_annotation("pos", "ITJ")).unwrap();
        graph.add_relation(Relation::textual(token, ds, 0, 5)).unwrap();
        doc.set_graph(graph).unwrap();
        StructureSnapshot::capture(&structure)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonDirStorage::open(dir.path()).await.unwrap();
        let original = snapshot("tokens");

        storage.save("tokens", &original).await.unwrap();

        assert!(dir.path().join("tokens.json").exists());
        assert!(!dir.path().join("tokens.json.partial").exists());
        let loaded = storage.load("tokens").await.unwrap().unwrap();
        assert_eq!(loaded, original);

        let structure = loaded.into_structure().unwrap();
        let doc = structure.node_by_path("corpus/sub/doc").unwrap();
        let guard = doc.graph();
        let graph = guard.as_ref().unwrap();
        assert_eq!(graph.covered_text(&graph.nodes()[0].id).as_deref(), Some("Hallo"));
    }

    #[tokio::test]
    async fn test_missing_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonDirStorage::open(dir.path().join("nested")).await.unwrap();

        assert!(storage.load("nothing").await.unwrap().is_none());
        assert!(!storage.delete("nothing").await.unwrap());

        storage.save("pos", &snapshot("pos")).await.unwrap();
        assert!(storage.exists("pos").await.unwrap());
        assert!(storage.delete("pos").await.unwrap());
        assert!(!storage.exists("pos").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonDirStorage::open(dir.path()).await.unwrap();
        for name in ["tiger-pos", "tiger-lemma", "conll"] {
            storage.save(name, &snapshot(name)).await.unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "not a snapshot").unwrap();

        assert_eq!(
            storage.list(Some("tiger*")).await.unwrap(),
            vec!["tiger-lemma", "tiger-pos"]
        );
        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.structure_count, 3);
        assert!(stats.total_size_bytes > 0);
    }

    #[tokio::test]
    async fn test_unsafe_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonDirStorage::open(dir.path()).await.unwrap();

        assert!(matches!(
            storage.save("../escape", &snapshot("x")).await,
            Err(StorageError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonDirStorage::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        assert!(matches!(
            storage.load("broken").await,
            Err(StorageError::Serialization(_))
        ));
    }
}
