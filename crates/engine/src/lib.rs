//! # Quillvault Engine
//!
//! The embedded local inference engine: runs GGUF-quantized language models
//! on-device via [Candle](https://github.com/huggingface/candle), with zero
//! internet after the first model download and zero API keys.
//!
//! The engine implements `quillvault_core::InferenceEngine` — one generation
//! at a time, interruptible between token steps via a cooperative stop flag.

mod local;

pub use local::LocalEngine;
