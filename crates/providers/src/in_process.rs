//! In-process model adapter.
//!
//! A text-generation pipeline is built once by `load()` and then driven with
//! the full system-prefixed history. The pipeline returns the conversation
//! extended with its reply; the adapter hands back the final message.

use async_trait::async_trait;
use kbchat_config::InProcessModelConfig;
use kbchat_core::message::with_system_prompt;
use kbchat_core::{Backend, BackendError, BackendKind, Message, Probe};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::sampling::Sampling;

/// A constructed generation pipeline. Calls block.
pub trait TextGenerationPipeline: Send + Sync {
    /// Returns `messages` followed by the generated turn(s).
    fn generate(
        &self,
        messages: &[Message],
        sampling: &Sampling,
    ) -> Result<Vec<Message>, BackendError>;
}

/// Builds a pipeline from configuration. Blocks while weights load.
pub trait PipelineBuilder: Send + Sync {
    fn build(
        &self,
        config: &InProcessModelConfig,
    ) -> Result<Arc<dyn TextGenerationPipeline>, BackendError>;

    /// Cheap pre-flight check that the model reference can be resolved.
    fn check(&self, config: &InProcessModelConfig) -> Probe;
}

/// Builder used when no in-process engine is compiled in.
pub struct UnsupportedBuilder;

impl PipelineBuilder for UnsupportedBuilder {
    fn build(
        &self,
        _config: &InProcessModelConfig,
    ) -> Result<Arc<dyn TextGenerationPipeline>, BackendError> {
        Err(BackendError::Unavailable(
            "in-process model support not compiled in; rebuild with `--features local`".into(),
        ))
    }

    fn check(&self, _config: &InProcessModelConfig) -> Probe {
        Probe::not_ready(
            "in-process model support not compiled in; rebuild with `--features local`",
        )
    }
}

pub struct InProcessBackend {
    config: InProcessModelConfig,
    sampling: Sampling,
    default_system: String,
    builder: Arc<dyn PipelineBuilder>,
    pipeline: RwLock<Option<Arc<dyn TextGenerationPipeline>>>,
}

impl InProcessBackend {
    pub fn new(
        config: InProcessModelConfig,
        sampling: Sampling,
        default_system: impl Into<String>,
    ) -> Self {
        Self::with_builder(config, sampling, default_system, default_builder())
    }

    pub fn with_builder(
        config: InProcessModelConfig,
        sampling: Sampling,
        default_system: impl Into<String>,
        builder: Arc<dyn PipelineBuilder>,
    ) -> Self {
        Self {
            config,
            sampling,
            default_system: default_system.into(),
            builder,
            pipeline: RwLock::new(None),
        }
    }
}

#[cfg(feature = "local")]
fn default_builder() -> Arc<dyn PipelineBuilder> {
    Arc::new(crate::local::GgufLoader::default())
}

#[cfg(not(feature = "local"))]
fn default_builder() -> Arc<dyn PipelineBuilder> {
    Arc::new(UnsupportedBuilder)
}

#[async_trait]
impl Backend for InProcessBackend {
    fn name(&self) -> &str {
        &self.config.model
    }

    fn kind(&self) -> BackendKind {
        BackendKind::InProcessModel
    }

    async fn probe(&self) -> Probe {
        if self.pipeline.read().await.is_some() {
            return Probe::ready("Model pipeline loaded");
        }
        self.builder.check(&self.config)
    }

    async fn load(&self) -> Probe {
        let mut slot = self.pipeline.write().await;
        if slot.is_some() {
            return Probe::ready("Model pipeline already loaded");
        }

        let builder = self.builder.clone();
        let config = self.config.clone();
        match tokio::task::spawn_blocking(move || builder.build(&config)).await {
            Ok(Ok(pipeline)) => {
                *slot = Some(pipeline);
                info!(
                    model = %self.config.model,
                    device = %self.config.device,
                    "In-process pipeline ready"
                );
                Probe::ready("Model loaded successfully")
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Pipeline construction failed");
                Probe::not_ready(format!("Error loading model: {}", e.detail()))
            }
            Err(e) => Probe::not_ready(format!("Model loading task failed: {e}")),
        }
    }

    async fn generate(&self, messages: &[Message]) -> std::result::Result<String, BackendError> {
        let pipeline = self
            .pipeline
            .read()
            .await
            .clone()
            .ok_or_else(|| BackendError::Unavailable("model not loaded, call load first".into()))?;

        let messages = with_system_prompt(messages, &self.default_system);
        let sampling = self.sampling.clone();

        // A panicking engine surfaces as a JoinError and becomes a failed turn.
        let output = tokio::task::spawn_blocking(move || pipeline.generate(&messages, &sampling))
            .await
            .map_err(|e| BackendError::GenerationFailed(format!("generation task failed: {e}")))??;

        output
            .last()
            .filter(|m| !m.is_system())
            .map(|m| m.content.clone())
            .ok_or_else(|| BackendError::GenerationFailed("pipeline produced no output".into()))
    }
}
