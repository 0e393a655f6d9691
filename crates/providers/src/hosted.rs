//! Hosted inference API adapter.
//!
//! Talks to a remote text-generation endpoint (Hugging Face Inference API
//! style) with a bearer token. Two input protocols are supported:
//!
//! - `flat_prompt`: the conversation is collapsed to the system text plus the
//!   last user message, rendered as a single `[INST]` prompt.
//! - `messages`: the full system-prefixed history is posted as a message list.
//!
//! Responses are decoded with the ordered strategies in [`crate::shapes`].

use async_trait::async_trait;
use kbchat_config::{HostedApiConfig, HostedProtocol};
use kbchat_core::message::{last_user_content, with_system_prompt};
use kbchat_core::{Backend, BackendError, BackendKind, Message, Probe};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use crate::sampling::Sampling;
use crate::shapes::{self, HOSTED_SHAPES};

/// Maximum characters of a raw body quoted in an error.
const BODY_EXCERPT_CHARS: usize = 200;

pub struct HostedApiBackend {
    config: HostedApiConfig,
    sampling: Sampling,
    default_system: String,
    client: reqwest::Client,
}

impl HostedApiBackend {
    pub fn new(
        config: HostedApiConfig,
        sampling: Sampling,
        default_system: impl Into<String>,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BackendError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            sampling,
            default_system: default_system.into(),
            client,
        })
    }

    fn api_key(&self) -> Option<&str> {
        self.config.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    /// Request body for the configured protocol.
    pub fn build_payload(&self, messages: &[Message]) -> Result<Value, BackendError> {
        let messages = with_system_prompt(messages, &self.default_system);

        match self.config.protocol {
            HostedProtocol::FlatPrompt => {
                let prompt = flat_prompt(&messages)?;
                Ok(json!({
                    "inputs": prompt,
                    "parameters": {
                        "max_new_tokens": self.sampling.max_tokens,
                        "temperature": self.sampling.temperature,
                        "top_p": self.sampling.top_p,
                        "repetition_penalty": self.sampling.repetition_penalty,
                        "do_sample": true,
                        "return_full_text": false,
                    }
                }))
            }
            HostedProtocol::Messages => Ok(json!({
                "inputs": { "messages": messages },
                "parameters": {
                    "max_new_tokens": self.sampling.max_tokens,
                    "temperature": self.sampling.temperature,
                    "top_p": self.sampling.top_p,
                    "repetition_penalty": self.sampling.repetition_penalty,
                    "do_sample": true,
                }
            })),
        }
    }
}

/// Collapse a system-prefixed conversation to one instruction prompt.
///
/// Only the system text and the most recent user message survive; earlier
/// turns are left out of the prompt.
pub fn flat_prompt(messages: &[Message]) -> Result<String, BackendError> {
    let user = last_user_content(messages).ok_or_else(|| {
        BackendError::GenerationFailed("No user message found to respond to.".into())
    })?;
    let system = messages
        .first()
        .filter(|m| m.is_system())
        .map(|m| m.content.as_str())
        .unwrap_or_default();

    Ok(format!(
        "<s>[INST] {system} [/INST]</s>\n<s>[INST] {user} [/INST]"
    ))
}

/// Extract generated text from a decoded response body.
pub fn parse_response(body: &Value) -> Result<String, BackendError> {
    match shapes::parse_first(body, HOSTED_SHAPES) {
        Some((shape, text)) => {
            debug!(shape, "Matched hosted response shape");
            Ok(shapes::strip_prompt_artifact(&text))
        }
        None => Err(BackendError::GenerationFailed(format!(
            "unrecognized response format: {}",
            shapes::excerpt(&body.to_string(), BODY_EXCERPT_CHARS)
        ))),
    }
}

#[async_trait]
impl Backend for HostedApiBackend {
    fn name(&self) -> &str {
        &self.config.model
    }

    fn kind(&self) -> BackendKind {
        BackendKind::HostedApi
    }

    async fn probe(&self) -> Probe {
        let Some(key) = self.api_key() else {
            return Probe::not_ready(
                "Hosted API key not set, please set HUGGINGFACE_API_KEY or backend.api_key",
            );
        };

        let result = self
            .client
            .head(self.config.model_url())
            .bearer_auth(key)
            .send()
            .await;

        match result {
            Ok(resp) => match resp.status().as_u16() {
                200 => Probe::ready("Hosted API is available"),
                401 => Probe::not_ready("Invalid hosted API key"),
                404 => Probe::not_ready(format!("Model {} not found", self.config.model)),
                status => Probe::not_ready(format!("Hosted API returned status code {status}")),
            },
            Err(e) => Probe::not_ready(format!("Error connecting to hosted API: {e}")),
        }
    }

    async fn generate(&self, messages: &[Message]) -> std::result::Result<String, BackendError> {
        let key = self
            .api_key()
            .ok_or_else(|| BackendError::Unavailable("hosted API key not set".into()))?;
        let payload = self.build_payload(messages)?;

        debug!(
            model = %self.config.model,
            protocol = ?self.config.protocol,
            "Sending hosted generation request"
        );

        let response = self
            .client
            .post(self.config.model_url())
            .bearer_auth(key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if status != 200 {
            warn!(
                status,
                body = %shapes::excerpt(&text, BODY_EXCERPT_CHARS),
                "Hosted API returned error"
            );
            return Err(BackendError::Transport(format!(
                "hosted API returned {status}: {}",
                shapes::excerpt(&text, BODY_EXCERPT_CHARS)
            )));
        }

        let body: Value = serde_json::from_str(&text).map_err(|e| {
            BackendError::GenerationFailed(format!(
                "invalid JSON ({e}): {}",
                shapes::excerpt(&text, BODY_EXCERPT_CHARS)
            ))
        })?;

        parse_response(&body)
    }
}
