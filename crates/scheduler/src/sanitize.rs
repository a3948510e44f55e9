//! Output sanitizer — multi-stage cleanup applied after raw generation.
//!
//! Small local models stutter, echo their prompt, loop on a sentence, and
//! run out of budget mid-thought. The pipeline here repairs all of that.
//! Stage order is significant; every stage except truncation repair is a
//! pure `&str → String` transform that can be tested in isolation.
//!
//! ```text
//! strip tokens → (summary) strip label → squash repeats → dedupe lines
//!   → dedupe sentences → drop near-duplicates → (summary) trim tail
//!   → repair truncated ending
//! ```

use quillvault_core::JobKind;
use quillvault_core::engine::{InferenceEngine, SamplingProfile};
use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::prompt;

/// A later sentence is dropped when its token-set overlap with an earlier
/// one reaches this Jaccard similarity.
const NEAR_DUP_THRESHOLD: f64 = 0.82;

/// How many looping tail sentences a summary may shed.
const MAX_TAIL_DROPS: usize = 5;

/// How many continuation calls truncation repair may make.
const MAX_CONTINUATIONS: usize = 2;

/// Words too common to count toward sentence similarity.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "had", "has", "have",
    "he", "her", "his", "i", "in", "is", "it", "its", "of", "on", "or", "she", "that", "the",
    "their", "there", "they", "this", "to", "was", "were", "which", "will", "with", "you",
];

/// Words a sentence must not end on — a reply trailing off mid-clause.
const DANGLING_CONNECTORS: &[&str] = &[
    "a", "an", "and", "as", "at", "because", "but", "by", "for", "from", "if", "in", "into",
    "of", "on", "or", "so", "such", "that", "the", "then", "to", "which", "while", "with",
];

fn control_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<\|[^|>]*\|>").expect("static pattern"))
}

fn summary_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[\s*_#]*(document )?summary( of the (document|text))?\s*[:.\-]*\s*$")
            .expect("static pattern")
    })
}

// ── Stage 1: template tokens and role echo ─────────────────────────────

/// Remove `<|…|>` template/control tokens and a leading `assistant` echo.
pub fn strip_control_tokens(text: &str) -> String {
    let cleaned = control_token_re().replace_all(text, "");
    let mut rest = cleaned.trim_start();

    let echo_len = "assistant".len();
    if rest.len() >= echo_len
        && rest.is_char_boundary(echo_len)
        && rest[..echo_len].eq_ignore_ascii_case("assistant")
    {
        let after = &rest[echo_len..];
        if let Some(stripped) = after.strip_prefix(':') {
            rest = stripped;
        } else if after.starts_with('\n') || after.starts_with("\r\n") {
            rest = after;
        }
    }

    rest.trim().to_string()
}

// ── Stage 2 (summary only): echoed label line ──────────────────────────

/// Drop an echoed `Summary:`-style heading line and leading markdown
/// emphasis markers.
pub fn strip_summary_label(text: &str) -> String {
    let mut rest = text.trim_start();

    if let Some((first_line, remainder)) = rest.split_once('\n') {
        if summary_label_re().is_match(first_line.trim()) {
            rest = remainder.trim_start();
        }
    }

    rest.trim_start_matches(['*', '_']).trim().to_string()
}

// ── Stage 3: stutter squash ────────────────────────────────────────────

/// Collapse a word repeated ≥3 times consecutively, then a two-word phrase
/// repeated ≥3 times consecutively, each to a single occurrence.
pub fn squash_repeats(text: &str) -> String {
    let squashed = squash_word_runs(text);
    squash_bigram_runs(&squashed)
}

/// Byte spans of the words in `text` (alphanumeric runs, apostrophes kept).
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        if c.is_alphanumeric() || c == '\'' {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start.take() {
            spans.push((s, i));
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

fn whitespace_between(text: &str, a: (usize, usize), b: (usize, usize)) -> bool {
    text[a.1..b.0].chars().all(char::is_whitespace)
}

/// Rebuild `text` with the given byte ranges removed.
fn remove_ranges(text: &str, cuts: &[(usize, usize)]) -> String {
    if cuts.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    for &(start, end) in cuts {
        out.push_str(&text[pos..start]);
        pos = end;
    }
    out.push_str(&text[pos..]);
    out
}

fn squash_word_runs(text: &str) -> String {
    let spans = word_spans(text);
    let word = |i: usize| text[spans[i].0..spans[i].1].to_lowercase();

    let mut cuts = Vec::new();
    let mut i = 0;
    while i < spans.len() {
        let w = word(i);
        let mut j = i;
        while j + 1 < spans.len()
            && word(j + 1) == w
            && whitespace_between(text, spans[j], spans[j + 1])
        {
            j += 1;
        }
        if j - i + 1 >= 3 {
            cuts.push((spans[i].1, spans[j].1));
        }
        i = j + 1;
    }
    remove_ranges(text, &cuts)
}

fn squash_bigram_runs(text: &str) -> String {
    let spans = word_spans(text);
    if spans.len() < 6 {
        return text.to_string();
    }
    let words: Vec<String> = spans
        .iter()
        .map(|&(s, e)| text[s..e].to_lowercase())
        .collect();
    let ws = |a: usize, b: usize| whitespace_between(text, spans[a], spans[b]);

    let mut cuts = Vec::new();
    let mut i = 0;
    while i + 1 < spans.len() {
        let mut reps = 1;
        if ws(i, i + 1) {
            while i + 2 * reps + 1 < spans.len()
                && words[i + 2 * reps] == words[i]
                && words[i + 2 * reps + 1] == words[i + 1]
                && ws(i + 2 * reps - 1, i + 2 * reps)
                && ws(i + 2 * reps, i + 2 * reps + 1)
            {
                reps += 1;
            }
        }
        if reps >= 3 {
            cuts.push((spans[i + 1].1, spans[i + 2 * reps - 1].1));
            i += 2 * reps;
        } else {
            i += 1;
        }
    }
    remove_ranges(text, &cuts)
}

// ── Stage 4: consecutive duplicate lines ───────────────────────────────

/// Remove exact consecutive duplicate lines.
pub fn dedupe_consecutive_lines(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in text.lines() {
        if out.last() != Some(&line) {
            out.push(line);
        }
    }
    out.join("\n")
}

// ── Sentence utilities (stages 5–8) ────────────────────────────────────

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…')
}

fn is_closing(c: char) -> bool {
    matches!(c, '"' | '\'' | '”' | '’' | ')' | ']' | '}' | '»')
}

/// Split text into sentence slices. A sentence ends at terminal
/// punctuation (plus any closing quotes/brackets) followed by whitespace;
/// a trailing fragment without terminal punctuation is its own sentence.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_terminal(c) {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if is_terminal(next) || is_closing(next) {
                chars.next();
                end = j + next.len_utf8();
            } else {
                break;
            }
        }
        let boundary = match chars.peek() {
            Some(&(_, next)) => next.is_whitespace(),
            None => true,
        };
        if boundary {
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Case- and punctuation-insensitive form used for duplicate detection.
fn normalize_sentence(sentence: &str) -> String {
    let mut norm = String::with_capacity(sentence.len());
    let mut last_was_space = true;
    for c in sentence.chars() {
        if c.is_alphanumeric() {
            norm.extend(c.to_lowercase());
            last_was_space = false;
        } else if !last_was_space {
            norm.push(' ');
            last_was_space = true;
        }
    }
    norm.trim_end().to_string()
}

/// Stop-word-filtered token set used for near-duplicate detection.
fn content_token_set(sentence: &str) -> HashSet<String> {
    normalize_sentence(sentence)
        .split(' ')
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 1.0;
    }
    intersection as f64 / union as f64
}

// ── Stage 5: exact duplicate sentences ─────────────────────────────────

/// Remove exact duplicate sentences globally: first occurrence wins, order
/// preserved. Idempotent.
pub fn dedupe_sentences_global(text: &str) -> String {
    let sentences = split_sentences(text);
    if sentences.len() <= 1 {
        return text.trim().to_string();
    }
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    for s in sentences {
        let norm = normalize_sentence(s);
        if norm.is_empty() || seen.insert(norm) {
            kept.push(s);
        }
    }
    kept.join(" ")
}

// ── Stage 6: near-duplicate sentences ──────────────────────────────────

/// Drop a later sentence whose stop-word-filtered token set is nearly the
/// same as any earlier kept sentence's.
pub fn drop_near_duplicate_sentences(text: &str) -> String {
    let sentences = split_sentences(text);
    if sentences.len() <= 1 {
        return text.trim().to_string();
    }
    let mut kept: Vec<&str> = Vec::new();
    let mut kept_sets: Vec<HashSet<String>> = Vec::new();
    for s in sentences {
        let set = content_token_set(s);
        let near_dup =
            !set.is_empty() && kept_sets.iter().any(|k| jaccard(k, &set) >= NEAR_DUP_THRESHOLD);
        if near_dup {
            debug!(sentence = s, "Dropping near-duplicate sentence");
        } else {
            kept.push(s);
            kept_sets.push(set);
        }
    }
    kept.join(" ")
}

// ── Stage 7 (summary only): looping tail ───────────────────────────────

/// While the final sentence repeats any earlier sentence, drop it.
/// Handles models that loop at the end of a long summary.
pub fn trim_repeated_tail(text: &str) -> String {
    let mut sentences = split_sentences(text);
    if sentences.len() <= 1 {
        return text.trim().to_string();
    }
    let mut drops = 0;
    while sentences.len() > 1 && drops < MAX_TAIL_DROPS {
        let last_norm = normalize_sentence(sentences[sentences.len() - 1]);
        if last_norm.is_empty() {
            break;
        }
        let repeated = sentences[..sentences.len() - 1]
            .iter()
            .any(|s| normalize_sentence(s) == last_norm);
        if !repeated {
            break;
        }
        sentences.pop();
        drops += 1;
    }
    sentences.join(" ")
}

// ── Stage 8: truncated-ending repair ───────────────────────────────────

/// Whether the text ends in terminal punctuation (optionally followed by a
/// closing quote/bracket) and not on a dangling connector.
pub fn ends_cleanly(text: &str) -> bool {
    let trimmed = text.trim_end();
    if trimmed.is_empty() {
        return true;
    }

    let mut chars = trimmed.chars().rev().peekable();
    while chars.peek().copied().is_some_and(is_closing) {
        chars.next();
    }
    let Some(last) = chars.next() else {
        return false;
    };
    if !is_terminal(last) {
        return false;
    }

    // "…such as." still reads truncated: check the word before the period.
    let remainder: String = chars.collect::<String>().chars().rev().collect();
    let last_word = remainder
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .next_back()
        .map(str::to_lowercase);
    match last_word {
        Some(w) => !DANGLING_CONNECTORS.contains(&w.as_str()),
        None => true,
    }
}

/// Trim back to the last sentence that ends cleanly. If none does, the
/// text is returned unchanged (trimmed).
pub fn hard_trim_to_sentence(text: &str) -> String {
    let sentences = split_sentences(text);
    let mut end = sentences.len();
    while end > 0 {
        let candidate = sentences[..end].join(" ");
        if ends_cleanly(&candidate) {
            return candidate;
        }
        end -= 1;
    }
    text.trim().to_string()
}

/// Repair a truncated ending by asking the model for up to two short
/// continuations, then hard-trimming if it still trails off.
///
/// An engine failure here downgrades to a hard trim — the main generation
/// already succeeded, and a clipped sentence beats a lost reply.
pub async fn repair_truncation(
    engine: &dyn InferenceEngine,
    assembled_prompt: &str,
    mut text: String,
    profile: &SamplingProfile,
) -> String {
    for attempt in 0..MAX_CONTINUATIONS {
        if ends_cleanly(&text) {
            return text;
        }
        debug!(attempt = attempt + 1, "Requesting continuation for truncated output");
        let continuation_prompt = prompt::assemble_continuation(assembled_prompt, &text);
        match engine.complete(&continuation_prompt, profile).await {
            Ok(more) => {
                let more = strip_control_tokens(&more);
                if !more.is_empty() {
                    if !text.ends_with(char::is_whitespace)
                        && !more.starts_with(|c: char| c.is_ascii_punctuation())
                    {
                        text.push(' ');
                    }
                    text.push_str(&more);
                }
            }
            Err(e) => {
                warn!(error = %e, "Continuation call failed, falling back to hard trim");
                break;
            }
        }
    }

    if ends_cleanly(&text) {
        text
    } else {
        hard_trim_to_sentence(&text)
    }
}

// ── Pipeline ───────────────────────────────────────────────────────────

/// Run stages 1–7 for the given job kind. Stage 8 (truncation repair)
/// needs engine access and runs separately via [`repair_truncation`].
pub fn clean(kind: JobKind, raw: &str) -> String {
    let mut text = strip_control_tokens(raw);
    if kind == JobKind::Summary {
        text = strip_summary_label(&text);
    }
    text = squash_repeats(&text);
    text = dedupe_consecutive_lines(&text);
    text = dedupe_sentences_global(&text);
    text = drop_near_duplicate_sentences(&text);
    if kind == JobKind::Summary {
        text = trim_repeated_tail(&text);
    }
    text
}

// ── Kind post-processing ───────────────────────────────────────────────

const MAX_NAME_LEN: usize = 80;
const MAX_TAGS: usize = 5;

/// Reduce a title generation to one tidy line.
pub fn postprocess_name(text: &str) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut name = line
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '“' || c == '”')
        .trim_end_matches(['.', ':', ','])
        .trim()
        .to_string();
    if name.len() > MAX_NAME_LEN {
        let cut = name
            .char_indices()
            .take_while(|&(i, _)| i < MAX_NAME_LEN)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(MAX_NAME_LEN);
        name.truncate(cut);
        name = name.trim_end().to_string();
    }
    name
}

/// Reduce a tag generation to a deduplicated lowercase comma list.
pub fn postprocess_tags(text: &str) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut seen = HashSet::new();
    let tags: Vec<String> = line
        .split(',')
        .map(|t| {
            t.trim()
                .trim_matches(|c: char| c == '"' || c == '\'' || c == '#' || c == '.')
                .to_lowercase()
        })
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .take(MAX_TAGS)
        .collect();
    tags.join(", ")
}

/// Apply the kind-specific final shaping after the shared pipeline.
pub fn finish(kind: JobKind, text: &str) -> String {
    match kind {
        JobKind::Name => postprocess_name(text),
        JobKind::Tag => postprocess_tags(text),
        JobKind::Chat | JobKind::Summary => text.trim().to_string(),
    }
}

/// Whether truncation repair applies to this kind at all — titles and tags
/// are single fragments, not prose.
pub fn needs_truncation_repair(kind: JobKind) -> bool {
    matches!(kind, JobKind::Chat | JobKind::Summary)
}
