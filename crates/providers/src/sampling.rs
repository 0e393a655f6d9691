//! Resolved sampling parameters handed to local model implementations.

use kbchat_config::GenerationParams;

/// Temperature used by every kind that has no kind-specific default.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, PartialEq)]
pub struct Sampling {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub stop: Vec<String>,
}

impl Sampling {
    pub fn from_params(params: &GenerationParams, default_temperature: f32) -> Self {
        Self {
            max_tokens: params.max_new_tokens,
            temperature: params.temperature_or(default_temperature),
            top_p: params.top_p,
            repetition_penalty: params.repetition_penalty,
            stop: params.stop.clone(),
        }
    }
}

impl Default for Sampling {
    fn default() -> Self {
        Self::from_params(&GenerationParams::default(), DEFAULT_TEMPERATURE)
    }
}
