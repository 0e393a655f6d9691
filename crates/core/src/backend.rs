//! Backend trait — the abstraction over inference backends.
//!
//! A Backend knows how to turn a normalized message list into generated text,
//! and how to report whether it is ready to do so.
//!
//! Implementations: hosted inference API, local chat daemon, native GGUF
//! binding, in-process model pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::message::Message;

/// The four supported backend kinds. Exactly one is active per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    InProcessModel,
    LocalDaemon,
    NativeBinding,
    HostedApi,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProcessModel => "in_process_model",
            Self::LocalDaemon => "local_daemon",
            Self::NativeBinding => "native_binding",
            Self::HostedApi => "hosted_api",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a readiness check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub ready: bool,
    pub message: String,
}

impl Probe {
    pub fn ready(message: impl Into<String>) -> Self {
        Self {
            ready: true,
            message: message.into(),
        }
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self {
            ready: false,
            message: message.into(),
        }
    }
}

/// The core Backend trait.
///
/// The router calls `load()` once, then `generate()` per turn, without knowing
/// which backend kind is behind it.
#[async_trait]
pub trait Backend: Send + Sync {
    /// A human-readable name for this backend (e.g. "hosted_api:meta-llama/...").
    fn name(&self) -> &str;

    /// Which kind of backend this is.
    fn kind(&self) -> BackendKind;

    /// Readiness check. Must be repeatable and free of side effects beyond
    /// the cost of whatever network call it makes.
    async fn probe(&self) -> Probe;

    /// One-time preparation (model construction for local kinds).
    ///
    /// Default implementation is a plain `probe()`, which is all the network
    /// kinds need.
    async fn load(&self) -> Probe {
        self.probe().await
    }

    /// Generate the next assistant reply for `messages`.
    async fn generate(&self, messages: &[Message]) -> std::result::Result<String, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_serializes_snake_case() {
        let json = serde_json::to_string(&BackendKind::LocalDaemon).unwrap();
        assert_eq!(json, "\"local_daemon\"");
        assert_eq!(BackendKind::HostedApi.to_string(), "hosted_api");
    }

    #[test]
    fn probe_constructors() {
        assert!(Probe::ready("ok").ready);
        let p = Probe::not_ready("missing");
        assert!(!p.ready);
        assert_eq!(p.message, "missing");
    }

    struct Echo;

    #[async_trait]
    impl Backend for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn kind(&self) -> BackendKind {
            BackendKind::LocalDaemon
        }
        async fn probe(&self) -> Probe {
            Probe::ready("echo ready")
        }
        async fn generate(&self, messages: &[Message]) -> Result<String, BackendError> {
            Ok(messages.last().map(|m| m.content.clone()).unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn default_load_delegates_to_probe() {
        let backend = Echo;
        assert_eq!(backend.load().await, Probe::ready("echo ready"));
        let reply = backend.generate(&[Message::user("ping")]).await.unwrap();
        assert_eq!(reply, "ping");
    }
}
