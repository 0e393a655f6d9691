//! Conversation state for kbchat.
//!
//! A [`ConversationSession`] owns one client's bounded history with the
//! knowledge-augmented system prompt at index 0 and drives the
//! [`kbchat_providers::BackendRouter`] for each turn. The [`SessionStore`]
//! maps client ids to sessions for the lifetime of the process.

pub mod session;
pub mod store;

pub use session::{ConversationSession, SessionConfig, SessionState};
pub use store::{SessionStore, SharedSession};
