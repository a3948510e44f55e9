//! Job domain types — one unit of scheduled inference work.
//!
//! A Job is created from a raw caller payload by the classifier, queued by
//! the scheduler, and settled exactly once through the request ledger.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier tying a job to its ledger entry.
///
/// Caller-supplied when the UI tracks its own requests, or generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of inference work a job performs.
///
/// The kind determines the system prompt, the sampling profile, the ledger
/// timeout, and the post-processing path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Interactive conversation turn.
    Chat,
    /// Document summarization (may run several sequential model calls).
    Summary,
    /// Generate a short title for a document or conversation.
    Name,
    /// Generate topic tags for a document.
    Tag,
}

impl JobKind {
    /// Whether this kind represents a direct user prompt (as opposed to a
    /// background document task).
    pub fn is_user_prompt(&self) -> bool {
        matches!(self, JobKind::Chat)
    }
}

/// How verbose a chat reply should be. Only applies to `Chat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    #[default]
    Brief,
    Detailed,
}

/// Flags parsed from the payload's protocol markers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFlags {
    /// Exclude prior conversation turns from the assembled prompt.
    pub no_history: bool,

    /// Reply verbosity for chat jobs.
    pub detail: DetailLevel,
}

/// Lifecycle state of a job.
///
/// `Queued → Running → {Completed | Aborted | Failed}`; terminal states are
/// final. At most one job is `Running` at any instant — the model context
/// services a single generation at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Aborted,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Aborted | JobState::Failed)
    }
}

/// One unit of scheduled inference work.
#[derive(Debug, Clone)]
pub struct Job {
    /// Ties this job to its ledger entry.
    pub request_id: RequestId,

    /// Determines prompts, sampling, timeout, and post-processing.
    pub kind: JobKind,

    /// The original untyped payload, markers included. Kept so a preempted
    /// summary can be requeued verbatim.
    pub raw_payload: String,

    /// Payload with all consumed markers removed.
    pub content: String,

    /// Flags parsed from the markers.
    pub flags: JobFlags,

    /// Lifecycle state.
    pub state: JobState,
}

impl Job {
    pub fn new(
        request_id: RequestId,
        kind: JobKind,
        raw_payload: impl Into<String>,
        content: impl Into<String>,
        flags: JobFlags,
    ) -> Self {
        Self {
            request_id,
            kind,
            raw_payload: raw_payload.into(),
            content: content.into(),
            flags,
            state: JobState::Queued,
        }
    }
}
