//! # Quillvault Core
//!
//! Domain types, traits, and error definitions for the quillvault inference
//! scheduler. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! The inference engine is defined as a trait here; the Candle-backed
//! implementation lives in `quillvault-engine`. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub engines
//! - Clean dependency graph (all crates depend inward on core)

pub mod engine;
pub mod error;
pub mod job;
pub mod message;

// Re-export key types at crate root for ergonomics
pub use engine::{InferenceEngine, SamplingProfile};
pub use error::{EngineError, Error, FailureCode, Result, ScheduleError};
pub use job::{DetailLevel, Job, JobFlags, JobKind, JobState, RequestId};
pub use message::{ChatMessage, ConversationContext, Role};
