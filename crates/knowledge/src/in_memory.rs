//! In-memory store — useful for testing and ephemeral runs.

use async_trait::async_trait;
use kbchat_core::error::KnowledgeError;
use kbchat_core::knowledge::{KnowledgeBase, KnowledgeStore};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryStore {
    saved: RwLock<KnowledgeBase>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `knowledge`.
    pub fn with_knowledge(knowledge: KnowledgeBase) -> Self {
        Self {
            saved: RwLock::new(knowledge),
        }
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(&self) -> Result<KnowledgeBase, KnowledgeError> {
        Ok(self.saved.read().await.clone())
    }

    async fn save(&self, knowledge: &KnowledgeBase) -> Result<(), KnowledgeError> {
        *self.saved.write().await = knowledge.clone();
        Ok(())
    }
}
