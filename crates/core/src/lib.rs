//! # kbchat Core
//!
//! Domain types, traits, and error definitions for the kbchat runtime.
//! This crate has **zero framework dependencies** — it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is defined as a trait here. Implementations live in their
//! respective crates:
//! - [`Backend`] is implemented once per inference backend kind in `kbchat-providers`
//! - [`KnowledgeStore`] is implemented by the persistence layer in `kbchat-knowledge`

pub mod backend;
pub mod error;
pub mod knowledge;
pub mod message;

// Re-export key types at crate root for ergonomics
pub use backend::{Backend, BackendKind, Probe};
pub use error::{BackendError, Error, KnowledgeError, Result};
pub use knowledge::{KnowledgeBase, KnowledgeStore};
pub use message::{Message, Role};
