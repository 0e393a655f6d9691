//! Local chat daemon adapter (Ollama-compatible REST API).
//!
//! Posts the full system-prefixed history to `{base_url}/api/chat` with
//! streaming disabled. Readiness is checked against the daemon's model
//! catalog at `{base_url}/api/tags`.

use async_trait::async_trait;
use kbchat_config::LocalDaemonConfig;
use kbchat_core::message::with_system_prompt;
use kbchat_core::{Backend, BackendError, BackendKind, Message, Probe};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use crate::sampling::Sampling;
use crate::shapes;

/// Temperature the daemon runs with when none is configured.
pub const DAEMON_DEFAULT_TEMPERATURE: f32 = 0.5;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const BODY_EXCERPT_CHARS: usize = 200;

pub struct LocalDaemonBackend {
    config: LocalDaemonConfig,
    sampling: Sampling,
    default_system: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

impl LocalDaemonBackend {
    pub fn new(
        config: LocalDaemonConfig,
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

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    pub fn build_payload(&self, messages: &[Message]) -> Value {
        json!({
            "model": self.config.model,
            "messages": with_system_prompt(messages, &self.default_system),
            "stream": false,
            "options": {
                "num_predict": self.sampling.max_tokens,
                "temperature": self.sampling.temperature,
                "top_p": self.sampling.top_p,
                "stop": self.sampling.stop,
            }
        })
    }

    /// Whether the catalog lists `model`, treating a missing tag as `:latest`.
    fn catalog_has_model(&self, names: &[String]) -> bool {
        let wanted = &self.config.model;
        names.iter().any(|name| {
            name == wanted
                || (!wanted.contains(':') && name.strip_suffix(":latest") == Some(wanted.as_str()))
        })
    }
}

/// Decode a `/api/chat` body.
///
/// Strict JSON first. Some daemon builds ignore `stream: false` and answer
/// with newline-delimited chunks, so fall back to the last line that decodes
/// and carries `message.content`.
pub fn parse_chat_body(body: &str) -> Result<String, BackendError> {
    if let Ok(parsed) = serde_json::from_str::<ChatResponse>(body) {
        return Ok(parsed.message.content);
    }

    debug!("Strict decode failed, scanning response line by line");
    body.lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .find_map(|line| serde_json::from_str::<ChatResponse>(line).ok())
        .map(|parsed| parsed.message.content)
        .ok_or_else(|| {
            BackendError::GenerationFailed(format!(
                "API response parsing error, original response: {}",
                shapes::excerpt(body, BODY_EXCERPT_CHARS)
            ))
        })
}

#[async_trait]
impl Backend for LocalDaemonBackend {
    fn name(&self) -> &str {
        &self.config.model
    }

    fn kind(&self) -> BackendKind {
        BackendKind::LocalDaemon
    }

    async fn probe(&self) -> Probe {
        let url = format!("{}/api/tags", self.base_url());
        let response = match self.client.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(r) => r,
            Err(e) if e.is_connect() || e.is_timeout() => {
                return Probe::not_ready(format!(
                    "Cannot connect to the local daemon, please make sure it is running (URL: {})",
                    self.base_url()
                ));
            }
            Err(e) => {
                return Probe::not_ready(format!(
                    "Error checking the local daemon (failed to connect to {}): {e}",
                    self.base_url()
                ));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Probe::not_ready(format!(
                "Local daemon response abnormal: {}",
                status.as_u16()
            ));
        }

        match response.json::<TagsResponse>().await {
            Ok(tags) => {
                let names: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
                if self.catalog_has_model(&names) {
                    Probe::ready("Local daemon is available, model has been downloaded")
                } else {
                    Probe::not_ready(format!(
                        "Model {model} not found in the local daemon. Please run 'ollama pull {model}' to download it.",
                        model = self.config.model
                    ))
                }
            }
            Err(e) => Probe::not_ready(format!("Error reading the local daemon catalog: {e}")),
        }
    }

    async fn generate(&self, messages: &[Message]) -> std::result::Result<String, BackendError> {
        let url = format!("{}/api/chat", self.base_url());
        let payload = self.build_payload(messages);

        debug!(
            model = %self.config.model,
            messages = messages.len(),
            "Sending daemon chat request"
        );

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Local daemon returned error");
            return Err(BackendError::Transport(format!(
                "local daemon returned {}: {}",
                status.as_u16(),
                shapes::excerpt(&body, BODY_EXCERPT_CHARS)
            )));
        }

        parse_chat_body(&body)
    }
}
