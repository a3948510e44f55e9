//! Job classifier — parses a raw caller payload into a typed job.
//!
//! The UI layer embeds protocol markers as string prefixes. They are
//! stripped in a fixed order: the no-history marker first, then exactly one
//! of the detail/brief markers, then a kind marker. A payload with no kind
//! marker is an ordinary chat turn.
//!
//! Classification is pure and idempotent: the stripped content contains no
//! markers, so classifying twice yields the same result as once.

use quillvault_core::{DetailLevel, JobFlags, JobKind};

/// Prefix excluding prior conversation turns from the prompt.
pub const NO_HISTORY_MARKER: &str = "<<<NO_HISTORY>>>";
/// Prefix requesting a long-form chat reply.
pub const DETAILED_MARKER: &str = "<<<DETAILED>>>";
/// Prefix requesting a short chat reply.
pub const BRIEF_MARKER: &str = "<<<BRIEF>>>";
/// Kind prefix for document summarization.
pub const SUMMARY_MARKER: &str = "<<<SUMMARY_REQUEST>>>";
/// Kind prefix for title generation.
pub const NAME_MARKER: &str = "<<<NAME_REQUEST>>>";
/// Kind prefix for tag generation.
pub const TAG_MARKER: &str = "<<<TAG_REQUEST>>>";

/// The typed result of parsing a raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub kind: JobKind,
    pub flags: JobFlags,
    /// Payload with all consumed markers removed.
    pub content: String,
}

/// Strip `marker` from the front of `payload` if present, returning the
/// remainder with leading whitespace trimmed.
fn strip_marker<'a>(payload: &'a str, marker: &str) -> Option<&'a str> {
    payload.strip_prefix(marker).map(|rest| rest.trim_start())
}

/// Parse a raw payload into `{kind, flags, content}`.
pub fn classify(raw_payload: &str) -> Classified {
    let mut rest = raw_payload.trim_start();
    let mut flags = JobFlags::default();

    if let Some(r) = strip_marker(rest, NO_HISTORY_MARKER) {
        flags.no_history = true;
        rest = r;
    }

    if let Some(r) = strip_marker(rest, DETAILED_MARKER) {
        flags.detail = DetailLevel::Detailed;
        rest = r;
    } else if let Some(r) = strip_marker(rest, BRIEF_MARKER) {
        flags.detail = DetailLevel::Brief;
        rest = r;
    }

    let (kind, content) = if let Some(r) = strip_marker(rest, SUMMARY_MARKER) {
        (JobKind::Summary, r)
    } else if let Some(r) = strip_marker(rest, NAME_MARKER) {
        (JobKind::Name, r)
    } else if let Some(r) = strip_marker(rest, TAG_MARKER) {
        (JobKind::Tag, r)
    } else {
        (JobKind::Chat, rest)
    };

    Classified {
        kind,
        flags,
        content: content.to_string(),
    }
}
