//! # Quillvault Scheduler
//!
//! The inference request scheduler: accepts heterogeneous AI job requests
//! from the UI layer, serializes them against the single shared model
//! context, and produces clean, non-repetitive, non-truncated text under
//! timeout and cancellation pressure.
//!
//! ## Pipeline
//!
//! ```text
//! UI → Scheduler::submit → classify → [preemption check] → prompt assembly
//!    → InferenceEngine → sanitize → RequestLedger::settle → UI callback
//! ```
//!
//! Guarantees:
//! - At most one job runs at any instant (the model is non-reentrant).
//! - Every request settles exactly once: success, failure, or timeout.
//! - An interactive chat preempts a running summary; the summary is
//!   requeued and resumed, not failed.

pub mod classify;
pub mod ledger;
pub mod prompt;
pub mod sanitize;
pub mod summarize;

mod queue;

pub use classify::{Classified, classify};
pub use ledger::{FailureFn, RequestLedger, SuccessFn};
pub use queue::Scheduler;
