//! InferenceEngine trait — the abstraction over the local model.
//!
//! The engine is a shared, non-reentrant resource: at most one generation
//! call may be outstanding, and the scheduler is responsible for enforcing
//! that. The scheduler calls `complete()` without knowing which backend is
//! in use — the production implementation lives in `quillvault-engine`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Generation parameters for one model call.
///
/// Each job kind gets its own profile — short deterministic output for
/// titles and tags, longer and warmer output for chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingProfile {
    /// Softmax temperature (lower = more deterministic)
    pub temperature: f64,

    /// Nucleus sampling cutoff
    pub top_p: f64,

    /// Penalty applied to recently generated tokens
    pub repeat_penalty: f32,

    /// How many trailing tokens the repeat penalty looks back over
    pub repeat_last_n: usize,

    /// Tokens below this fraction of the top probability are masked out
    pub min_p: f64,

    /// Output length budget in tokens
    pub max_tokens: usize,
}

impl SamplingProfile {
    /// The base profile the model ships with; per-kind profiles are
    /// derived from this.
    pub fn base() -> Self {
        Self {
            temperature: 0.5,
            top_p: 0.92,
            repeat_penalty: 1.1,
            repeat_last_n: 64,
            min_p: 0.05,
            max_tokens: 256,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_repeat_penalty(mut self, repeat_penalty: f32) -> Self {
        self.repeat_penalty = repeat_penalty;
        self
    }
}

impl Default for SamplingProfile {
    fn default() -> Self {
        Self::base()
    }
}

/// The core engine trait.
///
/// `complete()` suspends until generation finishes or an earlier
/// `request_stop()` takes effect. Stopping is cooperative: the flag is
/// observed between token steps, and a stopped generation resolves with
/// whatever text was produced so far — callers on the abort/cancel paths
/// discard it.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// A human-readable name for this engine (e.g., "local", "mock").
    fn name(&self) -> &str;

    /// Run one generation to completion (or until stopped).
    async fn complete(
        &self,
        prompt: &str,
        profile: &SamplingProfile,
    ) -> std::result::Result<String, EngineError>;

    /// Ask the engine to stop its current generation. Best-effort and
    /// asynchronous: acknowledged by the in-flight `complete()` returning.
    fn request_stop(&self);
}
