//! Process-wide registry of conversation sessions.
//!
//! Sessions are created on first contact and live until the process exits
//! or they are removed explicitly. The registry lock only covers lookup and
//! insertion; each session has its own lock for turns.

use kbchat_knowledge::KnowledgeManager;
use kbchat_providers::BackendRouter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::session::{ConversationSession, SessionConfig};

pub type SharedSession = Arc<Mutex<ConversationSession>>;

pub struct SessionStore {
    config: SessionConfig,
    knowledge: Arc<KnowledgeManager>,
    router: Arc<BackendRouter>,
    sessions: Mutex<HashMap<String, SharedSession>>,
}

impl SessionStore {
    pub fn new(
        config: SessionConfig,
        knowledge: Arc<KnowledgeManager>,
        router: Arc<BackendRouter>,
    ) -> Self {
        Self {
            config,
            knowledge,
            router,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeManager> {
        &self.knowledge
    }

    pub fn router(&self) -> &Arc<BackendRouter> {
        &self.router
    }

    /// Session for `client_id`, creating it if absent. The flag is `true`
    /// when this call created it.
    pub async fn get_or_create(&self, client_id: &str) -> (SharedSession, bool) {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(client_id) {
            return (existing.clone(), false);
        }

        let session = ConversationSession::new(
            self.config.clone(),
            self.knowledge.clone(),
            self.router.clone(),
        )
        .await;
        let shared = Arc::new(Mutex::new(session));
        sessions.insert(client_id.to_string(), shared.clone());
        info!(client_id, live = sessions.len(), "Session created");
        (shared, true)
    }

    pub async fn get(&self, client_id: &str) -> Option<SharedSession> {
        self.sessions.lock().await.get(client_id).cloned()
    }

    pub async fn remove(&self, client_id: &str) -> bool {
        self.sessions.lock().await.remove(client_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Recompute every live session's system prompt after a knowledge change.
    ///
    /// Works on a snapshot of the registry so new sessions are not blocked.
    /// Idle sessions are refreshed before returning; a session busy with a
    /// turn is refreshed in the background once that turn releases it.
    /// Returns the number refreshed inline.
    pub async fn refresh_all(&self) -> usize {
        let snapshot: Vec<SharedSession> = self.sessions.lock().await.values().cloned().collect();

        let mut refreshed = 0;
        let mut busy = Vec::new();
        for session in snapshot {
            if let Ok(mut guard) = session.try_lock() {
                guard.refresh_system_prompt().await;
                refreshed += 1;
            } else {
                busy.push(session.clone());
            }
        }

        for session in busy {
            tokio::spawn(async move {
                session.lock().await.refresh_system_prompt().await;
            });
        }

        debug!(refreshed, "System prompts refreshed");
        refreshed
    }
}
