//! Chunked summarizer — one coherent summary from arbitrarily long input.
//!
//! Long documents do not fit the model's context, so the input is split on
//! paragraph boundaries into bounded chunks, each chunk is summarized
//! independently, and the partial summaries are reduced recursively into a
//! single one.
//!
//! The whole pipeline is abortable: the scheduler raises a shared flag when
//! an interactive chat preempts the summary, and the flag is checked before
//! and after every model call. An abort discards all partial results — it
//! is cancellation, not an error.

use quillvault_config::SummarizerConfig;
use quillvault_core::engine::InferenceEngine;
use quillvault_core::error::EngineError;
use quillvault_core::{DetailLevel, JobKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::prompt;
use crate::sanitize;

/// How a summarization run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The finished summary.
    Done(String),
    /// The abort flag was raised mid-pipeline; partial results discarded.
    Aborted,
}

/// Truncate `input` to the configured character ceiling, cutting on a char
/// boundary.
pub fn truncate_to_ceiling(input: &str, ceiling: usize) -> &str {
    if input.len() <= ceiling {
        return input;
    }
    let mut end = ceiling;
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    &input[..end]
}

/// Split on paragraph boundaries into chunks bounded by `target` chars.
///
/// Paragraphs are never split across chunks unless a single paragraph alone
/// exceeds the target — then it stands alone in its own chunk. Concatenating
/// the chunks (ignoring the injected separators) reproduces the input.
pub fn split_into_chunks(input: &str, target: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in split_paragraphs(input) {
        if current.is_empty() {
            current.push_str(paragraph);
        } else if current.len() + 2 + paragraph.len() <= target {
            current.push_str("\n\n");
            current.push_str(paragraph);
        } else {
            chunks.push(std::mem::take(&mut current));
            current.push_str(paragraph);
        }
        // An oversize paragraph is emitted on the next iteration regardless
        // of what follows, because nothing else can fit after it.
        if current.len() > target {
            chunks.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Paragraphs are runs of text between blank lines.
fn split_paragraphs(input: &str) -> Vec<&str> {
    input
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// The chunked map-reduce summarizer.
pub struct Summarizer {
    engine: Arc<dyn InferenceEngine>,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(engine: Arc<dyn InferenceEngine>, config: SummarizerConfig) -> Self {
        Self { engine, config }
    }

    /// Produce one summary of `input`, honoring `abort` around every
    /// engine call.
    pub async fn run(&self, input: &str, abort: &AtomicBool) -> Result<Outcome, EngineError> {
        let truncated = truncate_to_ceiling(input, self.config.input_ceiling);
        if truncated.len() < input.len() {
            debug!(
                original = input.len(),
                truncated = truncated.len(),
                "Input truncated to summarizer ceiling"
            );
        }

        let chunks = split_into_chunks(truncated, self.config.chunk_target);
        info!(chunks = chunks.len(), "Starting chunked summarization");

        if chunks.is_empty() {
            return Ok(Outcome::Done(String::new()));
        }

        if chunks.len() == 1 {
            let profile = prompt::profile_for(JobKind::Summary, Default::default());
            return match self.summarize_text(&chunks[0], &profile, abort).await? {
                Some(summary) => Ok(Outcome::Done(summary)),
                None => Ok(Outcome::Aborted),
            };
        }

        let chunk_profile = prompt::summary_chunk_profile();
        let mut partials = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            debug!(chunk = i + 1, total = chunks.len(), "Summarizing chunk");
            match self.summarize_text(chunk, &chunk_profile, abort).await? {
                Some(summary) => partials.push(summary),
                None => {
                    info!(chunk = i + 1, "Summarization aborted mid-chunk");
                    return Ok(Outcome::Aborted);
                }
            }
        }

        match self.combine(partials, abort).await? {
            Some(summary) => Ok(Outcome::Done(summary)),
            None => Ok(Outcome::Aborted),
        }
    }

    /// Summarize one piece of text. Returns `None` when aborted.
    async fn summarize_text(
        &self,
        text: &str,
        profile: &quillvault_core::SamplingProfile,
        abort: &AtomicBool,
    ) -> Result<Option<String>, EngineError> {
        if abort.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let prompt_text = prompt::assemble_summary(text);
        let raw = self.engine.complete(&prompt_text, profile).await?;
        if abort.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let cleaned = sanitize::clean(JobKind::Summary, &raw);
        let continuation = prompt::continuation_profile(JobKind::Summary, DetailLevel::Brief);
        let repaired =
            sanitize::repair_truncation(self.engine.as_ref(), &prompt_text, cleaned, &continuation)
                .await;
        Ok(Some(repaired))
    }

    /// Recursively reduce partial summaries into one. Returns `None` when
    /// aborted.
    ///
    /// When the count exceeds the combine threshold, fixed-size groups are
    /// each reduced with the tighter combine profile, then the group
    /// results are combined recursively.
    async fn combine(
        &self,
        mut partials: Vec<String>,
        abort: &AtomicBool,
    ) -> Result<Option<String>, EngineError> {
        loop {
            match partials.len() {
                0 => return Ok(Some(String::new())),
                1 => return Ok(Some(partials.remove(0))),
                n if n > self.config.combine_threshold => {
                    debug!(partials = n, "Reducing summary groups");
                    let mut reduced = Vec::with_capacity(n / self.config.combine_group_size + 1);
                    for group in partials.chunks(self.config.combine_group_size) {
                        match self.combine_group(group, abort).await? {
                            Some(summary) => reduced.push(summary),
                            None => return Ok(None),
                        }
                    }
                    partials = reduced;
                }
                _ => {
                    return self.combine_group(&partials, abort).await;
                }
            }
        }
    }

    /// One reduce call over a group of partial summaries.
    async fn combine_group(
        &self,
        group: &[String],
        abort: &AtomicBool,
    ) -> Result<Option<String>, EngineError> {
        if group.len() == 1 {
            return Ok(Some(group[0].clone()));
        }
        if abort.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let prompt_text = prompt::assemble_combine(group);
        let profile = prompt::summary_combine_profile();
        let raw = self.engine.complete(&prompt_text, &profile).await?;
        if abort.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let cleaned = sanitize::clean(JobKind::Summary, &raw);
        let continuation = prompt::continuation_profile(JobKind::Summary, DetailLevel::Brief);
        let repaired =
            sanitize::repair_truncation(self.engine.as_ref(), &prompt_text, cleaned, &continuation)
                .await;
        Ok(Some(repaired))
    }
}
