//! A single client's conversation.

use kbchat_config::ChatConfig;
use kbchat_core::{Message, Probe, Role};
use kbchat_knowledge::KnowledgeManager;
use kbchat_providers::BackendRouter;
use std::sync::Arc;
use tracing::debug;

/// Settings captured when a session is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Maximum non-system messages kept in history
    pub max_history: usize,
    pub base_prompt: String,
    /// Maximum knowledge items injected into the system prompt
    pub excerpt_cap: usize,
}

impl SessionConfig {
    pub fn from_chat(chat: &ChatConfig) -> Self {
        Self {
            max_history: chat.max_history,
            base_prompt: chat.system_prompt.clone(),
            excerpt_cap: chat.excerpt_cap,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_chat(&ChatConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Backend not yet confirmed ready
    Uninitialized,
    Ready,
}

pub struct ConversationSession {
    history: Vec<Message>,
    config: SessionConfig,
    knowledge: Arc<KnowledgeManager>,
    router: Arc<BackendRouter>,
    active_category: Option<String>,
    state: SessionState,
}

impl ConversationSession {
    /// New session with its system prompt built from all knowledge.
    pub async fn new(
        config: SessionConfig,
        knowledge: Arc<KnowledgeManager>,
        router: Arc<BackendRouter>,
    ) -> Self {
        let mut session = Self {
            history: Vec::new(),
            config,
            knowledge,
            router,
            active_category: None,
            state: SessionState::Uninitialized,
        };
        session.set_system_prompt(None).await;
        session
    }

    /// Ask the router to load its backend. Safe to call more than once.
    pub async fn initialize(&mut self) -> Probe {
        let probe = self.router.load().await;
        if probe.ready {
            self.state = SessionState::Ready;
        }
        probe
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn active_category(&self) -> Option<&str> {
        self.active_category.as_deref()
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.history
            .first()
            .filter(|m| m.is_system())
            .map(|m| m.content.as_str())
    }

    /// Rebuild the system prompt from the base prompt and the knowledge
    /// excerpt for `category`, and install it at index 0.
    pub async fn set_system_prompt(&mut self, category: Option<&str>) {
        let category = category.filter(|c| !c.is_empty());
        let excerpt = self
            .knowledge
            .format_excerpt(category, self.config.excerpt_cap)
            .await;

        let prompt = if excerpt.is_empty() {
            self.config.base_prompt.clone()
        } else {
            format!("{}\n\n{}", self.config.base_prompt, excerpt)
        };

        match self.history.first_mut() {
            Some(first) if first.is_system() => first.content = prompt,
            _ => self.history.insert(0, Message::system(prompt)),
        }
        self.active_category = category.map(String::from);
    }

    /// Rebuild the system prompt for the category this session last used.
    pub async fn refresh_system_prompt(&mut self) {
        let category = self.active_category.clone();
        self.set_system_prompt(category.as_deref()).await;
    }

    /// Append a message, then drop the oldest non-system messages until at
    /// most `max_history` remain. A system message at index 0 is never
    /// dropped or counted.
    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.history.push(Message::new(role, content));

        let keep_from = usize::from(self.history.first().is_some_and(Message::is_system));
        let excess = (self.history.len() - keep_from).saturating_sub(self.config.max_history);
        if excess > 0 {
            self.history.drain(keep_from..keep_from + excess);
        }
    }

    /// One user turn: switch category if asked, append the input, generate,
    /// append the reply and return it. Backend failures come back as the
    /// reply text, so history always alternates user and assistant.
    pub async fn turn(&mut self, user_input: impl Into<String>, category: Option<&str>) -> String {
        if let Some(category) = category.filter(|c| !c.is_empty())
            && self.active_category.as_deref() != Some(category)
        {
            self.set_system_prompt(Some(category)).await;
        }

        self.append(Role::User, user_input);
        let reply = self.router.generate(&self.history).await;
        self.append(Role::Assistant, reply.clone());

        debug!(history_len = self.history.len(), "Turn complete");
        reply
    }

    /// Drop every turn, keeping only the system message.
    pub async fn clear(&mut self) {
        match self.history.first() {
            Some(first) if first.is_system() => self.history.truncate(1),
            _ => {
                self.history.clear();
                self.refresh_system_prompt().await;
            }
        }
    }
}
