//! File-based knowledge store — one JSON document.
//!
//! Layout: `{"general": [...], "categories": {"name": [...], ...}}`, with
//! categories kept in the order they were first added.
//!
//! A missing file is an empty knowledge base. A file that fails to parse is
//! logged and also treated as empty; the next successful save overwrites it.

use async_trait::async_trait;
use kbchat_core::error::KnowledgeError;
use kbchat_core::knowledge::{KnowledgeBase, KnowledgeStore};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KnowledgeStore for JsonFileStore {
    fn name(&self) -> &str {
        "json_file"
    }

    async fn load(&self) -> Result<KnowledgeBase, KnowledgeError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No knowledge file yet, starting empty");
                return Ok(KnowledgeBase::new());
            }
            Err(e) => {
                return Err(KnowledgeError::Storage(format!(
                    "Failed to read knowledge file {}: {e}",
                    self.path.display()
                )));
            }
        };

        match serde_json::from_str::<KnowledgeBase>(&content) {
            Ok(knowledge) => {
                debug!(path = %self.path.display(), entries = knowledge.len(), "Knowledge loaded");
                Ok(knowledge)
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Knowledge file is corrupted, starting empty"
                );
                Ok(KnowledgeBase::new())
            }
        }
    }

    async fn save(&self, knowledge: &KnowledgeBase) -> Result<(), KnowledgeError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                KnowledgeError::Storage(format!("Failed to create knowledge directory: {e}"))
            })?;
        }

        let content = serde_json::to_string_pretty(knowledge)
            .map_err(|e| KnowledgeError::Serialization(e.to_string()))?;

        std::fs::write(&self.path, content)
            .map_err(|e| KnowledgeError::Storage(format!("Failed to write knowledge file: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("knowledge.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupted_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("knowledge.json"));

        let mut kb = KnowledgeBase::new();
        kb.add("The office opens at 9.", None);
        kb.add("Refunds take 5 days.", Some("billing"));
        kb.add("Ships worldwide.", Some("shipping"));
        kb.add("Invoices are monthly.", Some("billing"));

        store.save(&kb).await.unwrap();
        let reloaded = store.load().await.unwrap();
        assert_eq!(reloaded, kb);
        assert_eq!(
            reloaded.categories.names().collect::<Vec<_>>(),
            vec!["billing", "shipping"]
        );
    }

    #[tokio::test]
    async fn saved_document_has_expected_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.json");
        let store = JsonFileStore::new(&path);

        let mut kb = KnowledgeBase::new();
        kb.add("fact", Some("facts"));
        store.save(&kb).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({"general": [], "categories": {"facts": ["fact"]}}));
    }

    #[tokio::test]
    async fn unwritable_location_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        // Parent path is a regular file, so the directory cannot be created.
        let store = JsonFileStore::new(blocker.join("knowledge.json"));
        let err = store.save(&KnowledgeBase::new()).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Storage(_)));
    }
}
