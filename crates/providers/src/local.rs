//! Candle GGUF engine behind the native-binding and in-process adapters.
//!
//! Runs GGUF-quantized language models directly on this machine with
//! [Candle](https://github.com/huggingface/candle). A model is either a path
//! to a `.gguf` file or a preset alias that resolves to a Hugging Face repo
//! and is fetched through the hub cache.
//!
//! Supported model families:
//! - **TinyLlama** (1.1B params, Q4_K_M ~670 MB)
//! - **SmolLM** (135M–1.7B params)
//! - **Phi-2** and **Qwen2** (ChatML template)
//! - **Llama 2/3** and **Mistral** files (template picked from the file name)

use candle_core::quantized::gguf_file;
use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use hf_hub::api::sync::Api;
use kbchat_config::{InProcessModelConfig, NativeBindingConfig};
use kbchat_core::{BackendError, Message, Probe, Role};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use crate::in_process::{PipelineBuilder, TextGenerationPipeline};
use crate::native::{ChatChoice, ChatCompletion, ChatCompletionModel, ChatModelLoader};
use crate::sampling::Sampling;

const SEED: u64 = 42;
/// Tokens considered by the repetition penalty.
const REPEAT_LAST_N: usize = 64;
const FALLBACK_TOKENIZER_REPO: &str = "TinyLlama/TinyLlama-1.1B-Chat-v1.0";

// ── Presets ────────────────────────────────────────────────────────────

struct ModelPreset {
    repo: &'static str,
    gguf_file: &'static str,
    tokenizer_repo: &'static str,
    chat_template: ChatTemplate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatTemplate {
    /// `<|system|>\n{content}</s>\n<|user|>\n...<|assistant|>\n`
    TinyLlama,
    /// `<|im_start|>{role}\n{content}<|im_end|>\n...`
    ChatML,
    /// `[INST] <<SYS>>\n{system}\n<</SYS>>\n\n{content} [/INST]`
    Llama2,
    /// `<|start_header_id|>{role}<|end_header_id|>\n\n{content}<|eot_id|>`
    Llama3,
}

const PRESET_NAMES: &str =
    "tinyllama, smollm, smollm:135m, smollm:360m, smollm:1.7b, phi2, qwen:0.5b, qwen:1.5b";

fn resolve_preset(alias: &str) -> Option<ModelPreset> {
    let preset = |repo, gguf_file, tokenizer_repo, chat_template| ModelPreset {
        repo,
        gguf_file,
        tokenizer_repo,
        chat_template,
    };
    match alias.to_lowercase().as_str() {
        "tinyllama" | "tiny-llama" | "tinyllama-1.1b" => Some(preset(
            "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF",
            "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
            "TinyLlama/TinyLlama-1.1B-Chat-v1.0",
            ChatTemplate::TinyLlama,
        )),
        "smollm" | "smollm:135m" | "smollm-135m" => Some(preset(
            "TheBloke/SmolLM-135M-Instruct-GGUF",
            "smollm-135m-instruct.Q4_K_M.gguf",
            "HuggingFaceTB/SmolLM-135M-Instruct",
            ChatTemplate::ChatML,
        )),
        "smollm:360m" | "smollm-360m" => Some(preset(
            "TheBloke/SmolLM-360M-Instruct-GGUF",
            "smollm-360m-instruct.Q4_K_M.gguf",
            "HuggingFaceTB/SmolLM-360M-Instruct",
            ChatTemplate::ChatML,
        )),
        "smollm:1.7b" | "smollm-1.7b" => Some(preset(
            "TheBloke/SmolLM-1.7B-Instruct-GGUF",
            "smollm-1.7b-instruct.Q4_K_M.gguf",
            "HuggingFaceTB/SmolLM-1.7B-Instruct",
            ChatTemplate::ChatML,
        )),
        "phi2" | "phi-2" => Some(preset(
            "TheBloke/phi-2-GGUF",
            "phi-2.Q4_K_M.gguf",
            "microsoft/phi-2",
            ChatTemplate::ChatML,
        )),
        "qwen:0.5b" | "qwen-0.5b" | "qwen2-0.5b" => Some(preset(
            "Qwen/Qwen2-0.5B-Instruct-GGUF",
            "qwen2-0_5b-instruct-q4_k_m.gguf",
            "Qwen/Qwen2-0.5B-Instruct",
            ChatTemplate::ChatML,
        )),
        "qwen:1.5b" | "qwen-1.5b" | "qwen2-1.5b" => Some(preset(
            "Qwen/Qwen2-1.5B-Instruct-GGUF",
            "qwen2-1_5b-instruct-q4_k_m.gguf",
            "Qwen/Qwen2-1.5B-Instruct",
            ChatTemplate::ChatML,
        )),
        _ => None,
    }
}

/// Template guess for a bare GGUF file.
fn template_for_file(path: &Path) -> ChatTemplate {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.contains("tinyllama") {
        ChatTemplate::TinyLlama
    } else if name.contains("llama-3") || name.contains("llama3") {
        ChatTemplate::Llama3
    } else if name.contains("llama-2") || name.contains("llama2") || name.contains("mistral") {
        ChatTemplate::Llama2
    } else {
        ChatTemplate::ChatML
    }
}

// ── Prompt templates ───────────────────────────────────────────────────

fn format_prompt(template: ChatTemplate, messages: &[Message]) -> String {
    match template {
        ChatTemplate::TinyLlama => format_tinyllama(messages),
        ChatTemplate::ChatML => format_chatml(messages),
        ChatTemplate::Llama2 => format_llama2(messages),
        ChatTemplate::Llama3 => format_llama3(messages),
    }
}

fn format_tinyllama(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        prompt.push_str(&format!("<|{}|>\n{}</s>\n", msg.role, msg.content));
    }
    prompt.push_str("<|assistant|>\n");
    prompt
}

fn format_chatml(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        prompt.push_str(&format!("<|im_start|>{}\n{}<|im_end|>\n", msg.role, msg.content));
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

fn format_llama2(messages: &[Message]) -> String {
    let mut prompt = String::new();
    let mut pending_system = String::new();

    for msg in messages {
        match msg.role {
            Role::System => pending_system = msg.content.clone(),
            Role::User => {
                prompt.push_str("[INST] ");
                if !pending_system.is_empty() {
                    prompt.push_str(&format!("<<SYS>>\n{pending_system}\n<</SYS>>\n\n"));
                    pending_system.clear();
                }
                prompt.push_str(&msg.content);
                prompt.push_str(" [/INST]");
            }
            Role::Assistant => {
                prompt.push(' ');
                prompt.push_str(&msg.content);
                prompt.push_str(" </s>");
            }
        }
    }
    prompt
}

fn format_llama3(messages: &[Message]) -> String {
    let mut prompt = String::from("<|begin_of_text|>");
    for msg in messages {
        prompt.push_str(&format!(
            "<|start_header_id|>{}<|end_header_id|>\n\n{}<|eot_id|>",
            msg.role, msg.content
        ));
    }
    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    prompt
}

/// Cut generated text at the first stop sequence and drop trailing specials.
fn clean_output(text: &str, stop: &[String]) -> String {
    let cut = stop
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
        .unwrap_or(text.len());
    text[..cut]
        .trim()
        .trim_end_matches("</s>")
        .trim_end_matches("<|im_end|>")
        .trim_end_matches("<|eot_id|>")
        .trim()
        .to_string()
}

// ── Model state ────────────────────────────────────────────────────────

struct ModelState {
    model: qlm::ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    chat_template: ChatTemplate,
    eos_token_id: u32,
    context_size: usize,
}

fn candle_err(e: candle_core::Error) -> BackendError {
    BackendError::GenerationFailed(format!("candle inference error: {e}"))
}

impl ModelState {
    fn from_gguf(
        path: &Path,
        tokenizer: Tokenizer,
        chat_template: ChatTemplate,
        device: Device,
        context_size: usize,
    ) -> Result<Self, BackendError> {
        let mut file = std::fs::File::open(path)
            .map_err(|e| BackendError::Unavailable(format!("failed to open model file: {e}")))?;
        let gguf = gguf_file::Content::read(&mut file)
            .map_err(|e| BackendError::Unavailable(format!("failed to parse GGUF file: {e}")))?;
        let model = qlm::ModelWeights::from_gguf(gguf, &mut file, &device)
            .map_err(|e| BackendError::Unavailable(format!("failed to load model weights: {e}")))?;

        let eos_token_id = ["</s>", "<|endoftext|>", "<|im_end|>", "<|eot_id|>"]
            .iter()
            .find_map(|t| tokenizer.token_to_id(t))
            .unwrap_or(2);

        info!(path = %path.display(), eos_token_id, ?chat_template, "GGUF model loaded");

        Ok(Self {
            model,
            tokenizer,
            device,
            chat_template,
            eos_token_id,
            context_size,
        })
    }

    /// Tokenize, sample up to `max_tokens`, decode.
    fn generate(
        &mut self,
        messages: &[Message],
        sampling: &Sampling,
    ) -> Result<String, BackendError> {
        let prompt = format_prompt(self.chat_template, messages);
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| BackendError::GenerationFailed(format!("tokenization failed: {e}")))?;

        let max_tokens = sampling.max_tokens as usize;
        let budget = self.context_size.saturating_sub(max_tokens).max(1);
        let ids = encoding.get_ids();
        let prompt_ids = &ids[ids.len().saturating_sub(budget)..];

        debug!(
            prompt_tokens = prompt_ids.len(),
            max_tokens,
            temperature = sampling.temperature,
            "Starting local generation"
        );

        let temperature = (sampling.temperature > 0.0).then_some(sampling.temperature as f64);
        let top_p = (sampling.top_p < 1.0).then_some(sampling.top_p as f64);
        let mut logits_processor = LogitsProcessor::new(SEED, temperature, top_p);

        let mut all_tokens: Vec<u32> = prompt_ids.to_vec();
        let mut generated: Vec<u32> = Vec::new();
        let mut input = Tensor::new(prompt_ids, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(candle_err)?;
        let mut index_pos = 0;

        for _ in 0..max_tokens {
            let seq_len = input.dim(1).map_err(candle_err)?;
            let logits = self
                .model
                .forward(&input, index_pos)
                .and_then(|l| l.squeeze(0))
                .and_then(|l| l.to_dtype(DType::F32))
                .map_err(candle_err)?;
            index_pos += seq_len;

            let logits = if sampling.repetition_penalty == 1.0 {
                logits
            } else {
                let start = all_tokens.len().saturating_sub(REPEAT_LAST_N);
                candle_transformers::utils::apply_repeat_penalty(
                    &logits,
                    sampling.repetition_penalty,
                    &all_tokens[start..],
                )
                .map_err(candle_err)?
            };

            let next = logits_processor.sample(&logits).map_err(candle_err)?;
            if next == self.eos_token_id {
                break;
            }
            generated.push(next);
            all_tokens.push(next);

            input = Tensor::new(&[next][..], &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(candle_err)?;
        }

        let text = self
            .tokenizer
            .decode(&generated, true)
            .map_err(|e| BackendError::GenerationFailed(format!("detokenization failed: {e}")))?;

        debug!(completion_tokens = generated.len(), "Generation complete");
        Ok(clean_output(&text, &sampling.stop))
    }
}

// ── Loaded model handle ────────────────────────────────────────────────

/// A loaded GGUF model. Inference is single-threaded, so calls serialize on
/// the inner mutex.
pub struct GgufModel {
    state: Mutex<ModelState>,
}

impl GgufModel {
    fn run(&self, messages: &[Message], sampling: &Sampling) -> Result<String, BackendError> {
        let mut state = self.state.lock().map_err(|_| {
            BackendError::GenerationFailed("model state poisoned by an earlier panic".into())
        })?;
        state.generate(messages, sampling)
    }
}

impl ChatCompletionModel for GgufModel {
    fn create_chat_completion(
        &self,
        messages: &[Message],
        sampling: &Sampling,
    ) -> Result<ChatCompletion, BackendError> {
        let text = self.run(messages, sampling)?;
        Ok(ChatCompletion {
            choices: vec![ChatChoice {
                message: Message::assistant(text),
            }],
        })
    }
}

impl TextGenerationPipeline for GgufModel {
    fn generate(
        &self,
        messages: &[Message],
        sampling: &Sampling,
    ) -> Result<Vec<Message>, BackendError> {
        let text = self.run(messages, sampling)?;
        let mut out = messages.to_vec();
        out.push(Message::assistant(text));
        Ok(out)
    }
}

// ── Loader ─────────────────────────────────────────────────────────────

/// Builds [`GgufModel`]s for both local adapter kinds.
#[derive(Debug, Default)]
pub struct GgufLoader;

impl GgufLoader {
    fn hub() -> Result<Api, BackendError> {
        Api::new().map_err(|e| {
            BackendError::Unavailable(format!("failed to initialize Hugging Face Hub API: {e}"))
        })
    }

    fn fetch(api: &Api, repo: &str, file: &str) -> Result<PathBuf, BackendError> {
        api.model(repo.to_string())
            .get(file)
            .map_err(|e| {
                BackendError::Unavailable(format!("failed to download '{file}' from '{repo}': {e}"))
            })
    }

    /// `tokenizer.json` beside the model, else a fallback from the hub.
    fn tokenizer_for_file(path: &Path) -> Result<Tokenizer, BackendError> {
        let local = path.with_file_name("tokenizer.json");
        let tokenizer_path = if local.exists() {
            local
        } else {
            warn!("No tokenizer.json next to GGUF file, downloading fallback tokenizer");
            Self::fetch(&Self::hub()?, FALLBACK_TOKENIZER_REPO, "tokenizer.json")?
        };
        Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| BackendError::Unavailable(format!("failed to load tokenizer: {e}")))
    }

    fn load_file(
        path: &Path,
        device: Device,
        context_size: usize,
    ) -> Result<GgufModel, BackendError> {
        let tokenizer = Self::tokenizer_for_file(path)?;
        let template = template_for_file(path);
        let state = ModelState::from_gguf(path, tokenizer, template, device, context_size)?;
        Ok(GgufModel {
            state: Mutex::new(state),
        })
    }
}

fn select_device(prefer_gpu: bool) -> Device {
    if !prefer_gpu {
        return Device::Cpu;
    }
    Device::cuda_if_available(0).unwrap_or_else(|e| {
        warn!(error = %e, "GPU unavailable, using CPU");
        Device::Cpu
    })
}

impl ChatModelLoader for GgufLoader {
    fn load(
        &self,
        config: &NativeBindingConfig,
    ) -> Result<Arc<dyn ChatCompletionModel>, BackendError> {
        info!(
            path = %config.model_path,
            context_size = config.context_size,
            gpu_layers = config.gpu_layers,
            threads = config.threads,
            "Loading native GGUF model"
        );
        let device = select_device(config.gpu_layers != 0);
        let model = Self::load_file(Path::new(&config.model_path), device, config.context_size)?;
        Ok(Arc::new(model))
    }
}

impl PipelineBuilder for GgufLoader {
    fn build(
        &self,
        config: &InProcessModelConfig,
    ) -> Result<Arc<dyn TextGenerationPipeline>, BackendError> {
        let device = select_device(config.device != "cpu");
        let path = Path::new(&config.model);

        if path.is_file() {
            return Ok(Arc::new(Self::load_file(path, device, usize::MAX)?));
        }

        let preset = resolve_preset(&config.model).ok_or_else(|| {
            BackendError::Unavailable(format!(
                "unknown model '{}'; presets: {PRESET_NAMES}, or a path to a .gguf file",
                config.model
            ))
        })?;

        info!(model = %config.model, repo = preset.repo, "Fetching in-process model");
        let api = Self::hub()?;
        let model_path = Self::fetch(&api, preset.repo, preset.gguf_file)?;
        let tokenizer_path = Self::fetch(&api, preset.tokenizer_repo, "tokenizer.json")?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| BackendError::Unavailable(format!("failed to load tokenizer: {e}")))?;

        let state = ModelState::from_gguf(
            &model_path,
            tokenizer,
            preset.chat_template,
            device,
            usize::MAX,
        )?;
        Ok(Arc::new(GgufModel {
            state: Mutex::new(state),
        }))
    }

    fn check(&self, config: &InProcessModelConfig) -> Probe {
        if Path::new(&config.model).is_file() {
            Probe::ready("Model file check passed")
        } else if resolve_preset(&config.model).is_some() {
            Probe::ready(format!("Preset '{}' resolved", config.model))
        } else {
            Probe::not_ready(format!(
                "Unknown model '{}'. Available presets: {PRESET_NAMES}",
                config.model
            ))
        }
    }
}
