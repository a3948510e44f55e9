//! Local inference engine — runs the vault's model directly on device.
//!
//! Uses Candle to run GGUF-quantized Llama-family models. The scheduler is
//! the only caller and already serializes generations, but the model state
//! still sits behind a Mutex because Candle inference is inherently
//! single-threaded (CPU tensor ops).
//!
//! Stopping is cooperative: `request_stop()` raises a flag that the token
//! loop observes between steps, so an in-flight generation winds down within
//! one token's worth of work.

use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use candle_transformers::utils::apply_repeat_penalty;
use hf_hub::api::sync::Api;
use quillvault_core::engine::{InferenceEngine, SamplingProfile};
use quillvault_core::error::EngineError;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

// ── Well-known model aliases ───────────────────────────────────────────

/// Model presets — friendly aliases that resolve to HuggingFace repos + filenames.
struct ModelPreset {
    repo: &'static str,
    gguf_file: &'static str,
    tokenizer_repo: &'static str,
}

fn resolve_preset(alias: &str) -> Option<ModelPreset> {
    let alias_lower = alias.to_lowercase();
    match alias_lower.as_str() {
        "llama3.2:1b" | "llama3.2-1b" | "llama-3.2-1b" => Some(ModelPreset {
            repo: "bartowski/Llama-3.2-1B-Instruct-GGUF",
            gguf_file: "Llama-3.2-1B-Instruct-Q4_K_M.gguf",
            tokenizer_repo: "unsloth/Llama-3.2-1B-Instruct",
        }),
        "llama3.2:3b" | "llama3.2-3b" | "llama-3.2-3b" => Some(ModelPreset {
            repo: "bartowski/Llama-3.2-3B-Instruct-GGUF",
            gguf_file: "Llama-3.2-3B-Instruct-Q4_K_M.gguf",
            tokenizer_repo: "unsloth/Llama-3.2-3B-Instruct",
        }),
        "tinyllama" | "tinyllama-1.1b" => Some(ModelPreset {
            repo: "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF",
            gguf_file: "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
            tokenizer_repo: "TinyLlama/TinyLlama-1.1B-Chat-v1.0",
        }),
        _ => None,
    }
}

// ── Local engine ───────────────────────────────────────────────────────

/// Runs GGUF-quantized language models locally via Candle.
pub struct LocalEngine {
    inner: Arc<Mutex<Option<LocalModelState>>>,
    model_name: String,
    stop_flag: Arc<AtomicBool>,
}

/// The loaded model state (tokenizer + weights).
struct LocalModelState {
    model: qlm::ModelWeights,
    tokenizer: tokenizers::Tokenizer,
    device: Device,
    eos_token_id: u32,
}

impl LocalEngine {
    /// Create a new local engine.
    ///
    /// `model_name` can be:
    /// - A preset alias: `"llama3.2:1b"`, `"llama3.2:3b"`, `"tinyllama"`
    /// - A path to a local GGUF file: `"/path/to/model.gguf"`
    ///
    /// The model is loaded lazily on first request.
    pub fn new(model_name: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            model_name: model_name.to_string(),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Eagerly load the model (downloads if needed, then loads into memory).
    pub fn load(model_name: &str) -> Result<Self, EngineError> {
        let state = LocalModelState::load(model_name)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Some(state))),
            model_name: model_name.to_string(),
            stop_flag: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl LocalModelState {
    /// Load a model by name or path.
    fn load(model_name: &str) -> Result<Self, EngineError> {
        let device = Device::Cpu;

        // Check if it's a local file path
        if Path::new(model_name).exists() && model_name.ends_with(".gguf") {
            return Self::load_from_path(Path::new(model_name), &device);
        }

        // Resolve preset alias
        let preset = resolve_preset(model_name).ok_or_else(|| {
            EngineError::ModelNotFound(format!(
                "Unknown local model '{}'. Available presets: llama3.2:1b, llama3.2:3b, \
                 tinyllama. Or provide a path to a .gguf file.",
                model_name
            ))
        })?;

        info!(
            model = model_name,
            repo = preset.repo,
            file = preset.gguf_file,
            "Downloading/loading local model"
        );

        // Download via HuggingFace Hub (cached automatically)
        let api = Api::new().map_err(|e| {
            EngineError::Network(format!("Failed to initialize HuggingFace Hub API: {e}"))
        })?;

        let repo = api.model(preset.repo.to_string());
        let model_path = repo.get(preset.gguf_file).map_err(|e| {
            EngineError::Network(format!(
                "Failed to download model '{}' from '{}': {e}",
                preset.gguf_file, preset.repo
            ))
        })?;

        info!(path = %model_path.display(), "Model file ready");

        let tokenizer_repo = api.model(preset.tokenizer_repo.to_string());
        let tokenizer_path = tokenizer_repo.get("tokenizer.json").map_err(|e| {
            EngineError::Network(format!(
                "Failed to download tokenizer from '{}': {e}",
                preset.tokenizer_repo
            ))
        })?;

        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EngineError::LoadFailed(format!("Failed to load tokenizer: {e}")))?;

        let mut file = std::fs::File::open(&model_path)
            .map_err(|e| EngineError::LoadFailed(format!("Failed to open model file: {e}")))?;

        let gguf = gguf_file::Content::read(&mut file)
            .map_err(|e| EngineError::LoadFailed(format!("Failed to parse GGUF file: {e}")))?;

        let model = qlm::ModelWeights::from_gguf(gguf, &mut file, &device)
            .map_err(|e| EngineError::LoadFailed(format!("Failed to load model weights: {e}")))?;

        let eos_token_id = probe_eos(&tokenizer);

        info!(eos_token_id = eos_token_id, "Local model loaded successfully");

        Ok(Self {
            model,
            tokenizer,
            device,
            eos_token_id,
        })
    }

    /// Load from an explicit GGUF file path.
    fn load_from_path(path: &Path, device: &Device) -> Result<Self, EngineError> {
        info!(path = %path.display(), "Loading local GGUF model");

        let mut file = std::fs::File::open(path)
            .map_err(|e| EngineError::LoadFailed(format!("Failed to open GGUF file: {e}")))?;

        let gguf = gguf_file::Content::read(&mut file)
            .map_err(|e| EngineError::LoadFailed(format!("Failed to parse GGUF file: {e}")))?;

        let model = qlm::ModelWeights::from_gguf(gguf, &mut file, device)
            .map_err(|e| EngineError::LoadFailed(format!("Failed to load model weights: {e}")))?;

        // Expect tokenizer.json next to the GGUF file
        let tokenizer_path = path.with_file_name("tokenizer.json");
        if !tokenizer_path.exists() {
            return Err(EngineError::LoadFailed(format!(
                "No tokenizer.json found next to {}",
                path.display()
            )));
        }
        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EngineError::LoadFailed(format!("Failed to load tokenizer: {e}")))?;

        let eos_token_id = probe_eos(&tokenizer);

        Ok(Self {
            model,
            tokenizer,
            device: device.clone(),
            eos_token_id,
        })
    }

    /// Run inference: tokenize → generate tokens → decode.
    ///
    /// `stop` is polled between token steps; when raised, generation ends
    /// early and whatever was produced so far is returned.
    fn generate(
        &mut self,
        prompt: &str,
        profile: &SamplingProfile,
        stop: &AtomicBool,
    ) -> Result<String, EngineError> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| EngineError::Tokenization(e.to_string()))?;

        let prompt_tokens = encoding.get_ids().to_vec();

        debug!(
            prompt_tokens = prompt_tokens.len(),
            max_tokens = profile.max_tokens,
            temperature = profile.temperature,
            "Starting local generation"
        );

        let mut logits_processor = if profile.temperature <= 0.0 {
            LogitsProcessor::new(42, None, None)
        } else {
            LogitsProcessor::new(42, Some(profile.temperature), Some(profile.top_p))
        };

        // Prompt pass: feed the whole prompt at position 0
        let input = Tensor::new(prompt_tokens.as_slice(), &self.device)
            .map_err(map_candle_err)?
            .unsqueeze(0)
            .map_err(map_candle_err)?;
        let logits = self.model.forward(&input, 0).map_err(map_candle_err)?;
        let logits = last_position_logits(&logits)?;

        let mut all_tokens = prompt_tokens.clone();
        let mut generated_tokens: Vec<u32> = Vec::new();
        let mut next_token = self.sample(&logits, profile, &all_tokens, &mut logits_processor)?;

        loop {
            if next_token == self.eos_token_id {
                break;
            }
            generated_tokens.push(next_token);
            all_tokens.push(next_token);

            if generated_tokens.len() >= profile.max_tokens {
                break;
            }
            if stop.load(Ordering::SeqCst) {
                debug!(
                    generated = generated_tokens.len(),
                    "Stop flag observed, ending generation early"
                );
                break;
            }

            let input = Tensor::new(&[next_token][..], &self.device)
                .map_err(map_candle_err)?
                .unsqueeze(0)
                .map_err(map_candle_err)?;
            let logits = self
                .model
                .forward(&input, all_tokens.len() - 1)
                .map_err(map_candle_err)?;
            let logits = last_position_logits(&logits)?;

            next_token = self.sample(&logits, profile, &all_tokens, &mut logits_processor)?;
        }

        let output = self
            .tokenizer
            .decode(&generated_tokens, true)
            .map_err(|e| EngineError::Tokenization(e.to_string()))?;

        debug!(
            completion_tokens = generated_tokens.len(),
            output_len = output.len(),
            "Generation complete"
        );

        Ok(output)
    }

    /// Apply the repeat penalty and min-p floor, then sample one token.
    fn sample(
        &self,
        logits: &Tensor,
        profile: &SamplingProfile,
        all_tokens: &[u32],
        processor: &mut LogitsProcessor,
    ) -> Result<u32, EngineError> {
        let logits = if profile.repeat_penalty <= 1.0 {
            logits.clone()
        } else {
            let start_at = all_tokens.len().saturating_sub(profile.repeat_last_n);
            apply_repeat_penalty(logits, profile.repeat_penalty, &all_tokens[start_at..])
                .map_err(map_candle_err)?
        };

        let logits = if profile.min_p > 0.0 {
            apply_min_p(&logits, profile.min_p)?
        } else {
            logits
        };

        processor.sample(&logits).map_err(map_candle_err)
    }
}

/// Squeeze a `[1, seq, vocab]` (or `[seq, vocab]`) logits tensor down to the
/// final position's `[vocab]` row.
fn last_position_logits(logits: &Tensor) -> Result<Tensor, EngineError> {
    let logits = logits.squeeze(0).map_err(map_candle_err)?;
    if logits.rank() == 1 {
        return Ok(logits);
    }
    let last = logits.dim(0).map_err(map_candle_err)? - 1;
    logits.get(last).map_err(map_candle_err)
}

/// Mask tokens whose probability falls below `min_p` of the top token's.
///
/// Softmax is monotone in the logits, so `p_i / p_max < min_p` is exactly
/// `logit_i < logit_max + ln(min_p)` — no normalization needed.
fn apply_min_p(logits: &Tensor, min_p: f64) -> Result<Tensor, EngineError> {
    let values: Vec<f32> = logits.to_vec1().map_err(map_candle_err)?;
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let floor = max + (min_p as f32).ln();
    let masked: Vec<f32> = values
        .iter()
        .map(|&v| if v < floor { f32::NEG_INFINITY } else { v })
        .collect();
    Tensor::new(masked, logits.device()).map_err(map_candle_err)
}

/// Determine the EOS token id, trying the Llama 3 family first.
fn probe_eos(tokenizer: &tokenizers::Tokenizer) -> u32 {
    tokenizer
        .token_to_id("<|eot_id|>")
        .or_else(|| tokenizer.token_to_id("<|end_of_text|>"))
        .or_else(|| tokenizer.token_to_id("</s>"))
        .or_else(|| tokenizer.token_to_id("<|endoftext|>"))
        .unwrap_or(2) // fallback to common EOS id
}

/// Map Candle errors to EngineError.
fn map_candle_err(e: candle_core::Error) -> EngineError {
    EngineError::Generation(format!("Candle inference error: {e}"))
}

// ── InferenceEngine trait implementation ───────────────────────────────

#[async_trait]
impl InferenceEngine for LocalEngine {
    fn name(&self) -> &str {
        "local"
    }

    async fn complete(
        &self,
        prompt: &str,
        profile: &SamplingProfile,
    ) -> std::result::Result<String, EngineError> {
        // Ensure model is loaded (lazy initialization)
        {
            let state = self.inner.lock().await;
            if state.is_none() {
                drop(state);
                info!(model = %self.model_name, "Loading local model on first request...");
                let name = self.model_name.clone();
                let loaded = tokio::task::spawn_blocking(move || LocalModelState::load(&name))
                    .await
                    .map_err(|e| EngineError::LoadFailed(format!("Model loading task failed: {e}")))??;

                let mut state = self.inner.lock().await;
                *state = Some(loaded);
            }
        }

        // A stop raised before this generation started belongs to a previous
        // call; clear it so it cannot cut the new generation short.
        self.stop_flag.store(false, Ordering::SeqCst);

        let prompt = prompt.to_string();
        let profile = profile.clone();
        let inner = self.inner.clone();
        let stop = self.stop_flag.clone();

        // Run inference on a blocking thread (Candle is CPU-bound)
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.blocking_lock();
            let state = guard.as_mut().expect("model must be loaded");
            state.generate(&prompt, &profile, &stop)
        })
        .await
        .map_err(|e| EngineError::Generation(format!("Inference task panicked: {e}")))?
    }

    fn request_stop(&self) {
        if !self.stop_flag.swap(true, Ordering::SeqCst) {
            warn!(model = %self.model_name, "Stop requested for in-flight generation");
        }
    }
}
