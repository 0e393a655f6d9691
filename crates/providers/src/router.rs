//! Backend router — owns the single active backend for the process.
//!
//! Built once from [`AppConfig`]; the backend kind is fixed at construction
//! and never swapped. Loading is an explicit one-time step. Generation never
//! fails from the caller's point of view: errors are logged and turned into a
//! polite assistant reply that names the failure category.

use kbchat_config::{AppConfig, BackendConfig};
use kbchat_core::{Backend, BackendError, BackendKind, Message, Probe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::daemon::{DAEMON_DEFAULT_TEMPERATURE, LocalDaemonBackend};
use crate::hosted::HostedApiBackend;
use crate::in_process::InProcessBackend;
use crate::native::NativeBindingBackend;
use crate::sampling::{DEFAULT_TEMPERATURE, Sampling};

pub struct BackendRouter {
    backend: Arc<dyn Backend>,
    ready: AtomicBool,
    /// Serializes loads; holds the last successful load result.
    loaded: Mutex<Option<Probe>>,
}

impl BackendRouter {
    /// Wrap an already constructed backend.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            ready: AtomicBool::new(false),
            loaded: Mutex::new(None),
        }
    }

    /// Construct the backend selected by `config.backend`.
    ///
    /// Missing secrets or paths are fatal; there is no fallback to another kind.
    pub fn build(config: &AppConfig) -> Result<Self, BackendError> {
        let system = config.chat.system_prompt.clone();

        let backend: Arc<dyn Backend> = match &config.backend {
            BackendConfig::HostedApi(c) => {
                if c.api_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
                    return Err(BackendError::Config(
                        "hosted_api backend requires an API key (set HUGGINGFACE_API_KEY)".into(),
                    ));
                }
                require("hosted_api", "model", &c.model)?;
                require("hosted_api", "base_url", &c.base_url)?;
                let sampling = Sampling::from_params(&config.generation, DEFAULT_TEMPERATURE);
                Arc::new(HostedApiBackend::new(c.clone(), sampling, system)?)
            }
            BackendConfig::LocalDaemon(c) => {
                require("local_daemon", "base_url", &c.base_url)?;
                require("local_daemon", "model", &c.model)?;
                let sampling =
                    Sampling::from_params(&config.generation, DAEMON_DEFAULT_TEMPERATURE);
                Arc::new(LocalDaemonBackend::new(c.clone(), sampling, system)?)
            }
            BackendConfig::NativeBinding(c) => {
                require("native_binding", "model_path", &c.model_path)?;
                let sampling = Sampling::from_params(&config.generation, DEFAULT_TEMPERATURE);
                Arc::new(NativeBindingBackend::new(c.clone(), sampling, system))
            }
            BackendConfig::InProcessModel(c) => {
                require("in_process_model", "model", &c.model)?;
                let sampling = Sampling::from_params(&config.generation, DEFAULT_TEMPERATURE);
                Arc::new(InProcessBackend::new(c.clone(), sampling, system))
            }
        };

        info!(kind = %backend.kind(), model = %backend.name(), "Backend selected");
        Ok(Self::new(backend))
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Readiness check without loading anything.
    pub async fn probe(&self) -> Probe {
        self.backend.probe().await
    }

    /// Load the backend once. Success is cached; failures may be retried.
    pub async fn load(&self) -> Probe {
        let mut loaded = self.loaded.lock().await;
        if let Some(probe) = loaded.as_ref() {
            return probe.clone();
        }

        let probe = self.backend.load().await;
        if probe.ready {
            info!(kind = %self.kind(), model = %self.name(), "Backend ready");
            self.ready.store(true, Ordering::Release);
            *loaded = Some(probe.clone());
        } else {
            warn!(kind = %self.kind(), message = %probe.message, "Backend not ready");
        }
        probe
    }

    /// Generate with the raw error surfaced.
    pub async fn try_generate(&self, history: &[Message]) -> Result<String, BackendError> {
        if !self.is_ready() {
            return Err(BackendError::Unavailable(format!(
                "{} backend has not been loaded",
                self.kind()
            )));
        }
        self.backend.generate(history).await
    }

    /// Generate, converting any failure into a textual reply.
    pub async fn generate(&self, history: &[Message]) -> String {
        match self.try_generate(history).await {
            Ok(text) => text,
            Err(e) => {
                error!(
                    kind = %self.kind(),
                    category = e.category(),
                    detail = %e.detail(),
                    "Generation failed"
                );
                degraded_reply(&e)
            }
        }
    }
}

fn require(kind: &str, field: &str, value: &str) -> Result<(), BackendError> {
    if value.trim().is_empty() {
        return Err(BackendError::Config(format!("{kind} backend requires `{field}`")));
    }
    Ok(())
}

/// User-facing text for a failed generation.
pub fn degraded_reply(err: &BackendError) -> String {
    match err {
        BackendError::Unavailable(d) => {
            format!("Sorry, the model is not available right now ({d}). Please try again once it has loaded.")
        }
        BackendError::Transport(d) => {
            format!("Sorry, I couldn't reach the model backend: {d}")
        }
        BackendError::GenerationFailed(d) => {
            format!("I'm having trouble generating a response right now ({d}). Please try again later.")
        }
        BackendError::Config(d) => {
            format!("Sorry, the model backend is misconfigured: {d}")
        }
    }
}
