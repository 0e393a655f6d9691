//! Shared access to the process's knowledge base.
//!
//! Readers (`get`, `format_excerpt`) share a read lock. `add` holds the write
//! lock across the in-memory append and the store write, so concurrent adds
//! are serialized and never interleave their saves.

use kbchat_core::error::KnowledgeError;
use kbchat_core::knowledge::{KnowledgeBase, KnowledgeStore};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct KnowledgeManager {
    store: Arc<dyn KnowledgeStore>,
    knowledge: RwLock<KnowledgeBase>,
}

impl KnowledgeManager {
    /// Load the knowledge base from `store` once.
    pub async fn open(store: Arc<dyn KnowledgeStore>) -> Result<Self, KnowledgeError> {
        let knowledge = store.load().await?;
        info!(store = store.name(), entries = knowledge.len(), "Knowledge base loaded");
        Ok(Self {
            store,
            knowledge: RwLock::new(knowledge),
        })
    }

    /// Append and persist. On a failed save the append is undone and the
    /// error returned.
    pub async fn add(
        &self,
        content: impl Into<String>,
        category: Option<&str>,
    ) -> Result<String, KnowledgeError> {
        let mut knowledge = self.knowledge.write().await;
        let id = knowledge.add(content, category);

        if let Err(e) = self.store.save(&knowledge).await {
            warn!(id = %id, error = %e, "Knowledge save failed, rolling back");
            knowledge.remove_last(category);
            return Err(e);
        }

        debug!(id = %id, "Knowledge added");
        Ok(id)
    }

    pub async fn get(&self, category: Option<&str>) -> Vec<String> {
        self.knowledge.read().await.get(category)
    }

    pub async fn format_excerpt(&self, category: Option<&str>, max_items: usize) -> String {
        self.knowledge.read().await.format_excerpt(category, max_items)
    }

    /// Category names in insertion order.
    pub async fn categories(&self) -> Vec<String> {
        self.knowledge.read().await.categories.names().map(String::from).collect()
    }

    pub async fn snapshot(&self) -> KnowledgeBase {
        self.knowledge.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryStore, JsonFileStore};
    use async_trait::async_trait;

    struct ReadOnlyStore;

    #[async_trait]
    impl KnowledgeStore for ReadOnlyStore {
        fn name(&self) -> &str {
            "read_only"
        }

        async fn load(&self) -> Result<KnowledgeBase, KnowledgeError> {
            Ok(KnowledgeBase::new())
        }

        async fn save(&self, _knowledge: &KnowledgeBase) -> Result<(), KnowledgeError> {
            Err(KnowledgeError::Storage("read-only filesystem".into()))
        }
    }

    #[tokio::test]
    async fn ids_are_sequential_per_bucket() {
        let manager = KnowledgeManager::open(Arc::new(InMemoryStore::new())).await.unwrap();
        assert_eq!(manager.add("a", Some("facts")).await.unwrap(), "facts_0");
        assert_eq!(manager.add("b", Some("facts")).await.unwrap(), "facts_1");
        assert_eq!(manager.add("g", None).await.unwrap(), "general_0");
        assert_eq!(manager.add("c", Some("facts")).await.unwrap(), "facts_2");
        assert_eq!(manager.get(Some("facts")).await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn failed_save_propagates_and_rolls_back() {
        let manager = KnowledgeManager::open(Arc::new(ReadOnlyStore)).await.unwrap();
        let err = manager.add("lost", Some("facts")).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Storage(_)));
        assert!(manager.snapshot().await.is_empty());
        assert!(manager.categories().await.is_empty());
    }

    #[tokio::test]
    async fn adds_persist_through_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.json");

        let manager = KnowledgeManager::open(Arc::new(JsonFileStore::new(&path))).await.unwrap();
        manager.add("Paris is in France.", Some("geo")).await.unwrap();
        manager.add("Water boils at 100C.", None).await.unwrap();

        let reopened = KnowledgeManager::open(Arc::new(JsonFileStore::new(&path))).await.unwrap();
        assert_eq!(reopened.snapshot().await, manager.snapshot().await);
        assert_eq!(
            reopened.get(None).await,
            vec!["Water boils at 100C.", "Paris is in France."]
        );
    }

    #[tokio::test]
    async fn concurrent_adds_all_land() {
        let manager =
            Arc::new(KnowledgeManager::open(Arc::new(InMemoryStore::new())).await.unwrap());
        let mut handles = Vec::new();
        for i in 0..20 {
            let m = manager.clone();
            handles.push(tokio::spawn(async move {
                m.add(format!("item {i}"), Some("bulk")).await
            }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap().unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
        assert_eq!(manager.get(Some("bulk")).await.len(), 20);
    }

    #[tokio::test]
    async fn excerpt_uses_earliest_entries() {
        let manager = KnowledgeManager::open(Arc::new(InMemoryStore::new())).await.unwrap();
        for i in 0..7 {
            manager.add(format!("fact {i}"), None).await.unwrap();
        }
        let excerpt = manager.format_excerpt(None, 5).await;
        assert!(excerpt.contains("1. fact 0"));
        assert!(excerpt.contains("5. fact 4"));
        assert!(!excerpt.contains("fact 5"));
        assert_eq!(manager.format_excerpt(Some("nope"), 5).await, "");
    }
}
