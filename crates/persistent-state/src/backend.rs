//! Storage backends for persisted documents.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{Result, StateError};

/// Storage for whole JSON documents keyed by a namespaced string.
///
/// Backends never interpret the documents; typing happens in
/// [`PersistentState`](crate::PersistentState).
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Load the document stored under `key`, `None` if absent
    async fn load(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value` under `key`, replacing any previous document
    async fn save(&self, key: &str, value: &Value) -> Result<()>;

    /// Remove the document stored under `key` (no-op if absent)
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory backend.
///
/// Useful for tests and for hosts that do not need durability.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    documents: Mutex<HashMap<String, Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.documents.lock().get(key).cloned())
    }

    async fn save(&self, key: &str, value: &Value) -> Result<()> {
        self.documents.lock().insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.documents.lock().remove(key);
        Ok(())
    }
}

/// Directory of pretty-printed JSON files, one per key.
///
/// The directory is created on first save.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    root: PathBuf,
}

impl JsonFileBackend {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Directory holding the state files
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(StateError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl StateBackend for JsonFileBackend {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let content = serde_json::to_string_pretty(value)?;
        tokio::fs::write(&path, content).await?;
        log::debug!("Saved state '{}' to {:?}", key, path);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                log::debug!("Removed state '{}' from {:?}", key, path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_backend_roundtrip() {
        let backend = MemoryBackend::new();
        assert!(backend.load("missing").await.unwrap().is_none());

        backend.save("key", &json!({"a": 1})).await.unwrap();
        assert_eq!(backend.load("key").await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(backend.len(), 1);

        backend.remove("key").await.unwrap();
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_file_backend_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("state");

        {
            let backend = JsonFileBackend::new(&root);
            backend
                .save("macro_workflows", &json!({"wf-1": {"name": "One"}}))
                .await
                .unwrap();
        }

        let backend = JsonFileBackend::new(&root);
        let loaded = backend.load("macro_workflows").await.unwrap().unwrap();
        assert_eq!(loaded["wf-1"]["name"], "One");
        assert!(root.join("macro_workflows.json").exists());
    }

    #[tokio::test]
    async fn test_file_backend_missing_key_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let backend = JsonFileBackend::new(temp_dir.path());
        assert!(backend.load("nothing").await.unwrap().is_none());
        // Removing an absent key is not an error
        backend.remove("nothing").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_backend_rejects_path_keys() {
        let temp_dir = TempDir::new().unwrap();
        let backend = JsonFileBackend::new(temp_dir.path());
        let result = backend.save("../escape", &json!(1)).await;
        assert!(matches!(result, Err(StateError::InvalidKey(_))));
    }
}
