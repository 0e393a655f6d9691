//! Configuration loading, validation, and management for kbchat.
//!
//! Loads configuration from `~/.kbchat/config.toml` (or an explicit path) with
//! environment variable overrides. Validates all settings at startup.
//!
//! Backend selection is a single tagged union, [`BackendConfig`]. The
//! production override (`RENDER=true` or `ENVIRONMENT=production|prod`) is
//! applied once, in [`AppConfig::apply_env`], before any router is built.

use kbchat_core::BackendKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Conversation settings
    #[serde(default)]
    pub chat: ChatConfig,

    /// The active inference backend
    #[serde(default)]
    pub backend: BackendConfig,

    /// Sampling parameters shared by every backend kind
    #[serde(default)]
    pub generation: GenerationParams,

    /// Hosted backend used when production mode forces `hosted_api`
    #[serde(default)]
    pub production_hosted: HostedApiConfig,

    /// HTTP/WebSocket server settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Knowledge persistence settings
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Set by `apply_env`; never read from the file.
    #[serde(skip)]
    pub production: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Base system prompt, before the knowledge excerpt is appended
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Maximum number of non-system messages kept in a session
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Maximum number of knowledge entries injected into the system prompt
    #[serde(default = "default_excerpt_cap")]
    pub excerpt_cap: usize,
}

fn default_system_prompt() -> String {
    "You are a helpful AI assistant.".into()
}
fn default_max_history() -> usize {
    10
}
fn default_excerpt_cap() -> usize {
    5
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_history: default_max_history(),
            excerpt_cap: default_excerpt_cap(),
        }
    }
}

/// Sampling parameters.
///
/// `temperature` is optional so each backend kind can keep its own default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,

    #[serde(default = "default_stop")]
    pub stop: Vec<String>,
}

fn default_max_new_tokens() -> u32 {
    256
}
fn default_top_p() -> f32 {
    0.9
}
fn default_repetition_penalty() -> f32 {
    1.1
}
fn default_stop() -> Vec<String> {
    vec!["</s>".into()]
}

impl GenerationParams {
    /// Configured temperature, or the backend kind's own default.
    pub fn temperature_or(&self, default: f32) -> f32 {
        self.temperature.unwrap_or(default)
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: default_max_new_tokens(),
            temperature: None,
            top_p: default_top_p(),
            repetition_penalty: default_repetition_penalty(),
            stop: default_stop(),
        }
    }
}

/// Exactly one backend kind with its own parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    InProcessModel(InProcessModelConfig),
    LocalDaemon(LocalDaemonConfig),
    NativeBinding(NativeBindingConfig),
    HostedApi(HostedApiConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::InProcessModel(_) => BackendKind::InProcessModel,
            Self::LocalDaemon(_) => BackendKind::LocalDaemon,
            Self::NativeBinding(_) => BackendKind::NativeBinding,
            Self::HostedApi(_) => BackendKind::HostedApi,
        }
    }

    /// The model identifier (name, repo id or file path) of the active kind.
    pub fn model(&self) -> &str {
        match self {
            Self::InProcessModel(c) => &c.model,
            Self::LocalDaemon(c) => &c.model,
            Self::NativeBinding(c) => &c.model_path,
            Self::HostedApi(c) => &c.model,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::LocalDaemon(LocalDaemonConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InProcessModelConfig {
    /// Preset alias (e.g. "tinyllama") or a path to a `.gguf` file
    #[serde(default = "default_in_process_model")]
    pub model: String,

    /// "cpu" forces the CPU; anything else uses a GPU when one is available
    #[serde(default = "default_device")]
    pub device: String,
}

fn default_in_process_model() -> String {
    "tinyllama".into()
}
fn default_device() -> String {
    "auto".into()
}

impl Default for InProcessModelConfig {
    fn default() -> Self {
        Self {
            model: default_in_process_model(),
            device: default_device(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalDaemonConfig {
    #[serde(default = "default_daemon_url")]
    pub base_url: String,

    #[serde(default = "default_daemon_model")]
    pub model: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_daemon_url() -> String {
    "http://localhost:11434".into()
}
fn default_daemon_model() -> String {
    "llama3.1".into()
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for LocalDaemonConfig {
    fn default() -> Self {
        Self {
            base_url: default_daemon_url(),
            model: default_daemon_model(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeBindingConfig {
    /// Path to the local GGUF model artifact
    #[serde(default)]
    pub model_path: String,

    #[serde(default = "default_context_size")]
    pub context_size: usize,

    /// GPU layers to offload (-1 = all)
    #[serde(default = "default_gpu_layers")]
    pub gpu_layers: i32,

    #[serde(default = "default_threads")]
    pub threads: usize,
}

fn default_context_size() -> usize {
    4096
}
fn default_gpu_layers() -> i32 {
    -1
}
fn default_threads() -> usize {
    4
}

impl Default for NativeBindingConfig {
    fn default() -> Self {
        Self {
            model_path: String::new(),
            context_size: default_context_size(),
            gpu_layers: default_gpu_layers(),
            threads: default_threads(),
        }
    }
}

/// How the hosted endpoint expects its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostedProtocol {
    /// Single `[INST]` prompt: system text + last user message only
    #[default]
    FlatPrompt,
    /// Structured `{"inputs": {"messages": [...]}}` with the full history
    Messages,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct HostedApiConfig {
    #[serde(default = "default_hosted_model")]
    pub model: String,

    #[serde(default = "default_hosted_url")]
    pub base_url: String,

    /// Falls back to `HUGGINGFACE_API_KEY` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default)]
    pub protocol: HostedProtocol,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_hosted_model() -> String {
    "meta-llama/Meta-Llama-3.1-8B-Instruct".into()
}
fn default_hosted_url() -> String {
    "https://api-inference.huggingface.co/models".into()
}

impl HostedApiConfig {
    /// Full inference URL for the configured model.
    pub fn model_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.model)
    }
}

impl Default for HostedApiConfig {
    fn default() -> Self {
        Self {
            model: default_hosted_model(),
            base_url: default_hosted_url(),
            api_key: None,
            protocol: HostedProtocol::default(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for HostedApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedApiConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("protocol", &self.protocol)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_knowledge_path")]
    pub path: PathBuf,
}

fn default_knowledge_path() -> PathBuf {
    PathBuf::from("knowledge.json")
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            path: default_knowledge_path(),
        }
    }
}

/// Snapshot of the environment variables that influence configuration.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub production: bool,
    pub hosted_api_key: Option<String>,
    pub port: Option<u16>,
}

impl Environment {
    /// Read the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary lookup function (used by tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let is_render = lookup("RENDER").is_some_and(|v| v.eq_ignore_ascii_case("true"));
        let env_setting = lookup("ENVIRONMENT")
            .unwrap_or_else(|| "local".into())
            .to_lowercase();
        let is_prod_env = matches!(env_setting.as_str(), "production" | "prod");

        Self {
            production: is_render || is_prod_env,
            hosted_api_key: lookup("HUGGINGFACE_API_KEY").filter(|k| !k.is_empty()),
            port: lookup("PORT").and_then(|p| p.parse().ok()),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.kbchat/config.toml) and
    /// apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path, &Environment::from_env())
    }

    /// Load from `path` and apply `env`.
    pub fn load_with_env(path: &Path, env: &Environment) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(env);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides. Production mode forces the hosted backend;
    /// this is the only place the backend kind can change.
    pub fn apply_env(&mut self, env: &Environment) {
        if let Some(port) = env.port {
            self.gateway.port = port;
        }

        self.production = env.production;
        if env.production && self.backend.kind() != BackendKind::HostedApi {
            tracing::info!(
                configured = %self.backend.kind(),
                "Production environment detected, using hosted_api backend"
            );
            self.backend = BackendConfig::HostedApi(self.production_hosted.clone());
        }

        // A blank key in the file counts as unset.
        if let BackendConfig::HostedApi(hosted) = &mut self.backend
            && hosted.api_key.as_deref().is_none_or(|k| k.trim().is_empty())
        {
            hosted.api_key = env.hosted_api_key.clone();
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".kbchat")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.generation.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::ValidationError(
                    "generation.temperature must be between 0.0 and 2.0".into(),
                ));
            }
        }

        if self.generation.top_p <= 0.0 || self.generation.top_p > 1.0 {
            return Err(ConfigError::ValidationError(
                "generation.top_p must be in (0.0, 1.0]".into(),
            ));
        }

        if self.chat.max_history == 0 {
            return Err(ConfigError::ValidationError(
                "chat.max_history must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.backend.kind(), BackendKind::LocalDaemon);
        assert_eq!(config.chat.max_history, 10);
        assert_eq!(config.chat.excerpt_cap, 5);
        assert_eq!(config.gateway.port, 8000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.backend.kind(), config.backend.kind());
        assert_eq!(parsed.chat.system_prompt, config.chat.system_prompt);
    }

    #[test]
    fn parses_tagged_backend_section() {
        let toml_str = r#"
[chat]
max_history = 4

[backend]
kind = "native_binding"
model_path = "/models/llama.gguf"
threads = 8

[generation]
max_new_tokens = 128
temperature = 0.2
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.chat.max_history, 4);
        match &config.backend {
            BackendConfig::NativeBinding(c) => {
                assert_eq!(c.model_path, "/models/llama.gguf");
                assert_eq!(c.threads, 8);
                assert_eq!(c.context_size, 4096);
            }
            other => panic!("unexpected backend {other:?}"),
        }
        assert_eq!(config.generation.max_new_tokens, 128);
        assert!((config.generation.temperature_or(0.7) - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn temperature_falls_back_per_kind() {
        let params = GenerationParams::default();
        assert!((params.temperature_or(0.5) - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            generation: GenerationParams {
                temperature: Some(5.0),
                ..GenerationParams::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_history_rejected() {
        let mut config = AppConfig::default();
        config.chat.max_history = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().backend.kind(), BackendKind::LocalDaemon);
    }

    #[test]
    fn load_from_file_applies_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[gateway]\nport = 9000\n").unwrap();

        let config = AppConfig::load_with_env(&path, &env_of(&[("PORT", "7000")])).unwrap();
        assert_eq!(config.gateway.port, 7000);
        assert!(!config.production);
    }

    #[test]
    fn production_detection() {
        assert!(env_of(&[("RENDER", "TRUE")]).production);
        assert!(env_of(&[("ENVIRONMENT", "prod")]).production);
        assert!(env_of(&[("ENVIRONMENT", "Production")]).production);
        assert!(!env_of(&[("ENVIRONMENT", "staging")]).production);
        assert!(!env_of(&[]).production);
    }

    #[test]
    fn production_forces_hosted_backend() {
        let mut config = AppConfig::default();
        config.production_hosted.model = "org/model".into();
        config.apply_env(&env_of(&[("RENDER", "true"), ("HUGGINGFACE_API_KEY", "hf_x")]));

        assert!(config.production);
        match &config.backend {
            BackendConfig::HostedApi(h) => {
                assert_eq!(h.model, "org/model");
                assert_eq!(h.api_key.as_deref(), Some("hf_x"));
            }
            other => panic!("expected hosted backend, got {other:?}"),
        }
    }

    #[test]
    fn hosted_key_from_config_wins_over_env() {
        let mut config = AppConfig {
            backend: BackendConfig::HostedApi(HostedApiConfig {
                api_key: Some("from_file".into()),
                ..HostedApiConfig::default()
            }),
            ..AppConfig::default()
        };
        config.apply_env(&env_of(&[("HUGGINGFACE_API_KEY", "from_env")]));
        match &config.backend {
            BackendConfig::HostedApi(h) => assert_eq!(h.api_key.as_deref(), Some("from_file")),
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn blank_hosted_key_takes_env_key() {
        let mut config = AppConfig {
            backend: BackendConfig::HostedApi(HostedApiConfig {
                api_key: Some("  ".into()),
                ..HostedApiConfig::default()
            }),
            ..AppConfig::default()
        };
        config.apply_env(&env_of(&[("HUGGINGFACE_API_KEY", "from_env")]));
        match &config.backend {
            BackendConfig::HostedApi(h) => assert_eq!(h.api_key.as_deref(), Some("from_env")),
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn hosted_model_url_and_redaction() {
        let hosted = HostedApiConfig {
            api_key: Some("hf_secret".into()),
            base_url: "https://example.test/models/".into(),
            model: "org/name".into(),
            ..HostedApiConfig::default()
        };
        assert_eq!(hosted.model_url(), "https://example.test/models/org/name");
        let debug = format!("{hosted:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hf_secret"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("local_daemon"));
        assert!(toml_str.contains("8000"));
    }

    #[test]
    fn in_process_section_parses_model_and_device() {
        let config: AppConfig =
            toml::from_str("[backend]\nkind = \"in_process_model\"\nmodel = \"phi2\"\n").unwrap();
        match &config.backend {
            BackendConfig::InProcessModel(c) => {
                assert_eq!(c.model, "phi2");
                assert_eq!(c.device, "auto");
            }
            other => panic!("unexpected backend {other:?}"),
        }

        let rendered = toml::to_string_pretty(&InProcessModelConfig::default()).unwrap();
        assert!(!rendered.contains("dtype"));
    }
}
