//! Prompt assembler — turns a job plus conversation history into a
//! model-ready prompt string and a sampling profile.
//!
//! The vault's model is a Llama 3 instruct variant, so prompts use the
//! Llama 3 turn format: role-tagged headers, `<|eot_id|>` turn delimiters,
//! ending with an open assistant turn for the model to fill.

use quillvault_core::{ConversationContext, DetailLevel, Job, JobKind, Role, SamplingProfile};

const CHAT_SYSTEM_PROMPT: &str = "You are the assistant inside a private document vault. \
     Answer the user's questions directly and concisely. \
     Never invent documents or contents you have not been shown.";

const SUMMARY_SYSTEM_PROMPT: &str = "You summarize documents. \
     Write a clear, factual summary of the text you are given. \
     Do not add opinions, headings, or commentary — only the summary itself.";

const NAME_SYSTEM_PROMPT: &str = "You generate titles. \
     Reply with a short descriptive title (at most eight words) for the text \
     you are given. Reply with the title only — no quotes, no punctuation \
     at the end, no explanation.";

const TAG_SYSTEM_PROMPT: &str = "You generate topic tags. \
     Reply with three to five short lowercase tags for the text you are \
     given, separated by commas. Reply with the tags only.";

const COMBINE_SYSTEM_PROMPT: &str = "You merge partial summaries. \
     Combine the given partial summaries into one coherent summary. \
     Remove repetition; keep every distinct fact. Reply with the merged \
     summary only.";

// ── Sampling profiles ──────────────────────────────────────────────────

/// Output budgets per job kind, in tokens.
const CHAT_BRIEF_BUDGET: usize = 256;
const CHAT_DETAILED_BUDGET: usize = 640;
const NAME_BUDGET: usize = 16;
const TAG_BUDGET: usize = 24;
const SUMMARY_SINGLE_BUDGET: usize = 320;
const SUMMARY_CHUNK_BUDGET: usize = 160;
const CONTINUATION_BUDGET: usize = 48;

/// The sampling profile for a job's main generation call.
pub fn profile_for(kind: JobKind, detail: DetailLevel) -> SamplingProfile {
    match kind {
        JobKind::Chat => match detail {
            DetailLevel::Brief => SamplingProfile::base().with_max_tokens(CHAT_BRIEF_BUDGET),
            DetailLevel::Detailed => SamplingProfile::base()
                .with_max_tokens(CHAT_DETAILED_BUDGET)
                .with_temperature(0.6),
        },
        JobKind::Summary => SamplingProfile::base().with_max_tokens(SUMMARY_SINGLE_BUDGET),
        JobKind::Name => SamplingProfile::base()
            .with_max_tokens(NAME_BUDGET)
            .with_temperature(0.3),
        JobKind::Tag => SamplingProfile::base()
            .with_max_tokens(TAG_BUDGET)
            .with_temperature(0.3),
    }
}

/// Profile for summarizing one chunk of a multi-chunk document.
pub fn summary_chunk_profile() -> SamplingProfile {
    SamplingProfile::base().with_max_tokens(SUMMARY_CHUNK_BUDGET)
}

/// Tighter profile for the recursive combine passes — the inputs are
/// already summaries, so repetition is the main failure mode.
pub fn summary_combine_profile() -> SamplingProfile {
    SamplingProfile::base()
        .with_max_tokens(SUMMARY_SINGLE_BUDGET)
        .with_temperature(0.3)
        .with_repeat_penalty(1.3)
}

/// Small-budget profile for truncated-ending repair continuations.
pub fn continuation_profile(kind: JobKind, detail: DetailLevel) -> SamplingProfile {
    profile_for(kind, detail).with_max_tokens(CONTINUATION_BUDGET)
}

// ── Prompt assembly ────────────────────────────────────────────────────

/// The system prompt template for a job kind.
pub fn system_prompt_for(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Chat => CHAT_SYSTEM_PROMPT,
        JobKind::Summary => SUMMARY_SYSTEM_PROMPT,
        JobKind::Name => NAME_SYSTEM_PROMPT,
        JobKind::Tag => TAG_SYSTEM_PROMPT,
    }
}

/// Append one closed turn in the Llama 3 format.
fn push_turn(prompt: &mut String, role: Role, content: &str) {
    prompt.push_str("<|start_header_id|>");
    prompt.push_str(role.header());
    prompt.push_str("<|end_header_id|>\n\n");
    prompt.push_str(content);
    prompt.push_str("<|eot_id|>");
}

/// Assemble the full model input for `job`.
///
/// Prior conversation turns are included only for chat jobs that did not
/// opt out via the no-history flag; background jobs (summary/name/tag)
/// never see the conversation.
pub fn assemble(job: &Job, context: &ConversationContext) -> String {
    let mut prompt = String::from("<|begin_of_text|>");
    push_turn(&mut prompt, Role::System, system_prompt_for(job.kind));

    if job.kind == JobKind::Chat && !job.flags.no_history {
        for msg in &context.messages {
            push_turn(&mut prompt, msg.role, &msg.content);
        }
    }

    push_turn(&mut prompt, Role::User, &job.content);
    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    prompt
}

/// Assemble a summarization prompt over a single piece of text (one chunk,
/// or the whole input when it fits).
pub fn assemble_summary(text: &str) -> String {
    let mut prompt = String::from("<|begin_of_text|>");
    push_turn(&mut prompt, Role::System, SUMMARY_SYSTEM_PROMPT);
    push_turn(&mut prompt, Role::User, text);
    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    prompt
}

/// Assemble a combine-pass prompt over a group of partial summaries.
pub fn assemble_combine(partials: &[String]) -> String {
    let mut prompt = String::from("<|begin_of_text|>");
    push_turn(&mut prompt, Role::System, COMBINE_SYSTEM_PROMPT);

    let mut body = String::new();
    for (i, partial) in partials.iter().enumerate() {
        if i > 0 {
            body.push_str("\n\n");
        }
        body.push_str(partial);
    }
    push_turn(&mut prompt, Role::User, &body);
    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    prompt
}

/// Extend an assembled prompt with the text generated so far, producing the
/// context for a continuation-repair call.
pub fn assemble_continuation(assembled: &str, generated_so_far: &str) -> String {
    let mut prompt = String::with_capacity(assembled.len() + generated_so_far.len());
    prompt.push_str(assembled);
    prompt.push_str(generated_so_far);
    prompt
}
