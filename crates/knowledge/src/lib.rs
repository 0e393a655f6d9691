//! Knowledge base persistence and process-wide access for kbchat.
//!
//! Stores (all implement `kbchat_core::KnowledgeStore`):
//! - **JsonFileStore**: a single pretty-printed JSON document on disk
//! - **InMemoryStore**: for tests and ephemeral runs
//!
//! [`KnowledgeManager`] owns the loaded [`kbchat_core::KnowledgeBase`], lets
//! readers run concurrently and serializes every add-then-save.

pub mod file_backend;
pub mod in_memory;
pub mod manager;

pub use file_backend::JsonFileStore;
pub use in_memory::InMemoryStore;
pub use manager::KnowledgeManager;
