//! Native binding adapter: a local model artifact loaded into this process.
//!
//! The binding itself is abstracted behind [`ChatModelLoader`] and
//! [`ChatCompletionModel`] so the adapter's load-once and fail-fast rules are
//! independent of the engine. With the `local` feature the loader is the
//! candle GGUF engine in [`crate::local`]; without it the loader reports that
//! the engine is not compiled in.

use async_trait::async_trait;
use kbchat_config::NativeBindingConfig;
use kbchat_core::message::with_system_prompt;
use kbchat_core::{Backend, BackendError, BackendKind, Message, Probe};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::sampling::Sampling;

/// One completion choice.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatChoice {
    pub message: Message,
}

/// A chat-completion result in the binding's native shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatCompletion {
    pub choices: Vec<ChatChoice>,
}

/// A loaded model that answers chat-completion calls. Calls block.
pub trait ChatCompletionModel: Send + Sync {
    fn create_chat_completion(
        &self,
        messages: &[Message],
        sampling: &Sampling,
    ) -> Result<ChatCompletion, BackendError>;
}

/// Builds a [`ChatCompletionModel`] from a model artifact. Blocks.
pub trait ChatModelLoader: Send + Sync {
    fn load(
        &self,
        config: &NativeBindingConfig,
    ) -> Result<Arc<dyn ChatCompletionModel>, BackendError>;
}

/// Loader used when no native engine is compiled in.
pub struct UnsupportedLoader;

impl ChatModelLoader for UnsupportedLoader {
    fn load(
        &self,
        _config: &NativeBindingConfig,
    ) -> Result<Arc<dyn ChatCompletionModel>, BackendError> {
        Err(BackendError::Unavailable(
            "native binding support not compiled in; rebuild with `--features local`".into(),
        ))
    }
}

pub struct NativeBindingBackend {
    config: NativeBindingConfig,
    sampling: Sampling,
    default_system: String,
    loader: Arc<dyn ChatModelLoader>,
    model: RwLock<Option<Arc<dyn ChatCompletionModel>>>,
}

impl NativeBindingBackend {
    /// Backend with the engine compiled into this build.
    pub fn new(
        config: NativeBindingConfig,
        sampling: Sampling,
        default_system: impl Into<String>,
    ) -> Self {
        Self::with_loader(config, sampling, default_system, default_loader())
    }

    pub fn with_loader(
        config: NativeBindingConfig,
        sampling: Sampling,
        default_system: impl Into<String>,
        loader: Arc<dyn ChatModelLoader>,
    ) -> Self {
        Self {
            config,
            sampling,
            default_system: default_system.into(),
            loader,
            model: RwLock::new(None),
        }
    }

    pub async fn is_loaded(&self) -> bool {
        self.model.read().await.is_some()
    }
}

#[cfg(feature = "local")]
fn default_loader() -> Arc<dyn ChatModelLoader> {
    Arc::new(crate::local::GgufLoader::default())
}

#[cfg(not(feature = "local"))]
fn default_loader() -> Arc<dyn ChatModelLoader> {
    Arc::new(UnsupportedLoader)
}

#[async_trait]
impl Backend for NativeBindingBackend {
    fn name(&self) -> &str {
        &self.config.model_path
    }

    fn kind(&self) -> BackendKind {
        BackendKind::NativeBinding
    }

    async fn probe(&self) -> Probe {
        if Path::new(&self.config.model_path).is_file() {
            Probe::ready("Model file check passed")
        } else {
            Probe::not_ready(format!("Model file does not exist: {}", self.config.model_path))
        }
    }

    async fn load(&self) -> Probe {
        let probe = self.probe().await;
        if !probe.ready {
            return probe;
        }

        let mut slot = self.model.write().await;
        if slot.is_some() {
            return Probe::ready("Model already loaded");
        }

        let loader = self.loader.clone();
        let config = self.config.clone();
        let result = tokio::task::spawn_blocking(move || loader.load(&config)).await;

        match result {
            Ok(Ok(model)) => {
                *slot = Some(model);
                info!(path = %self.config.model_path, "Native model loaded");
                Probe::ready("Model loaded successfully")
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Native model load failed");
                Probe::not_ready(format!("Error loading model: {}", e.detail()))
            }
            Err(e) => Probe::not_ready(format!("Model loading task failed: {e}")),
        }
    }

    async fn generate(&self, messages: &[Message]) -> std::result::Result<String, BackendError> {
        let model = self
            .model
            .read()
            .await
            .clone()
            .ok_or_else(|| BackendError::Unavailable("model not loaded, call load first".into()))?;

        let messages = with_system_prompt(messages, &self.default_system);
        let sampling = self.sampling.clone();
        let completion =
            tokio::task::spawn_blocking(move || model.create_chat_completion(&messages, &sampling))
                .await
                .map_err(|e| {
                    BackendError::GenerationFailed(format!("generation task failed: {e}"))
                })??;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| {
                BackendError::GenerationFailed(
                    "Unable to generate response: no choices returned".into(),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records the messages it was called with and answers from a script.
    struct ScriptedModel {
        choices: Vec<String>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl ChatCompletionModel for ScriptedModel {
        fn create_chat_completion(
            &self,
            messages: &[Message],
            _sampling: &Sampling,
        ) -> Result<ChatCompletion, BackendError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok(ChatCompletion {
                choices: self
                    .choices
                    .iter()
                    .map(|c| ChatChoice {
                        message: Message::assistant(c.clone()),
                    })
                    .collect(),
            })
        }
    }

    struct CountingLoader {
        model: Arc<ScriptedModel>,
        loads: AtomicUsize,
    }

    impl ChatModelLoader for CountingLoader {
        fn load(
            &self,
            _config: &NativeBindingConfig,
        ) -> Result<Arc<dyn ChatCompletionModel>, BackendError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.model.clone())
        }
    }

    fn setup(
        choices: &[&str],
    ) -> (tempfile::NamedTempFile, Arc<CountingLoader>, NativeBindingBackend) {
        let file = tempfile::NamedTempFile::new().unwrap();
        let loader = Arc::new(CountingLoader {
            model: Arc::new(ScriptedModel {
                choices: choices.iter().map(|c| c.to_string()).collect(),
                seen: Mutex::new(Vec::new()),
            }),
            loads: AtomicUsize::new(0),
        });
        let config = NativeBindingConfig {
            model_path: file.path().to_string_lossy().into_owned(),
            ..NativeBindingConfig::default()
        };
        let backend =
            NativeBindingBackend::with_loader(config, Sampling::default(), "sys", loader.clone());
        (file, loader, backend)
    }

    #[tokio::test]
    async fn generate_before_load_is_unavailable() {
        let (_file, _loader, backend) = setup(&["hi"]);
        let err = backend.generate(&[Message::user("x")]).await.unwrap_err();
        assert_eq!(err.category(), "backend_unavailable");
    }

    #[tokio::test]
    async fn load_once_then_generate_returns_first_choice() {
        let (_file, loader, backend) = setup(&["first", "second"]);
        assert!(backend.load().await.ready);
        assert!(backend.load().await.ready);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(backend.is_loaded().await);

        let reply = backend.generate(&[Message::user("x")]).await.unwrap();
        assert_eq!(reply, "first");

        let seen = loader.model.seen.lock().unwrap();
        assert_eq!(seen[0][0], Message::system("sys"));
        assert_eq!(seen[0][1], Message::user("x"));
    }

    #[tokio::test]
    async fn empty_choices_is_generation_failure() {
        let (_file, _loader, backend) = setup(&[]);
        assert!(backend.load().await.ready);
        let err = backend.generate(&[Message::user("x")]).await.unwrap_err();
        assert_eq!(err.category(), "generation_failed");
    }

    #[tokio::test]
    async fn missing_file_probe_and_load_fail() {
        let config = NativeBindingConfig {
            model_path: "/definitely/not/here.gguf".into(),
            ..NativeBindingConfig::default()
        };
        let backend = NativeBindingBackend::with_loader(
            config,
            Sampling::default(),
            "sys",
            Arc::new(UnsupportedLoader),
        );
        let probe = backend.probe().await;
        assert!(!probe.ready);
        assert!(probe.message.contains("does not exist"));
        assert!(!backend.load().await.ready);
    }

    #[tokio::test]
    async fn unsupported_loader_reports_reason() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = NativeBindingConfig {
            model_path: file.path().to_string_lossy().into_owned(),
            ..NativeBindingConfig::default()
        };
        let backend = NativeBindingBackend::with_loader(
            config,
            Sampling::default(),
            "sys",
            Arc::new(UnsupportedLoader),
        );
        let probe = backend.load().await;
        assert!(!probe.ready);
        assert!(probe.message.contains("features local"));
    }
}
