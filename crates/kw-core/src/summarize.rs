//! Naive sentence-splitting summarizer.
//!
//! Text is split on the literal `". "` delimiter. Abbreviations, decimals and
//! missing trailing punctuation are not handled.

const DELIMITER: &str = ". ";

pub const NO_SUMMARY: &str = "No summary available";
pub const NO_CONTENT: &str = "No content to summarize";

const SNIPPET_MAX_CHARS: usize = 150;

/// How much of the input a summary may keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryLimit {
    /// Keep whole units while the summary stays within this many characters.
    Chars(usize),
    /// Keep the first N units.
    Sentences(usize),
}

pub fn summarize(text: &str, limit: SummaryLimit) -> String {
    match limit {
        SummaryLimit::Chars(max_chars) => summarize_chars(text, max_chars),
        SummaryLimit::Sentences(count) => summarize_sentences(text, count),
    }
}

fn summarize_chars(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }

    let mut summary = String::new();
    let mut summary_len = 0usize;
    for unit in text.split(DELIMITER) {
        let unit = unit.trim();
        if summary_len + unit.chars().count() + 1 > max_chars {
            break;
        }
        summary.push_str(unit);
        if !unit.ends_with('.') {
            summary.push('.');
        }
        summary.push(' ');
        summary_len = summary.chars().count();
    }

    if summary.is_empty() {
        let first = text.split(DELIMITER).next().unwrap_or(text).trim();
        return first.chars().take(max_chars).collect();
    }
    summary.trim_end().to_string()
}

fn summarize_sentences(text: &str, count: usize) -> String {
    let text = text.trim();
    if text.is_empty() {
        return NO_SUMMARY.to_string();
    }

    let mut summary = text.split(DELIMITER).take(count).collect::<Vec<_>>().join(DELIMITER);
    if summary.trim().is_empty() {
        return NO_SUMMARY.to_string();
    }
    if !summary.ends_with('.') {
        summary.push('.');
    }
    summary
}

/// Short free-text summary: two sentences when there are more than two,
/// otherwise the text itself clipped to 150 characters.
pub fn summarize_snippet(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return NO_CONTENT.to_string();
    }

    if text.split(DELIMITER).count() > 2 {
        return summarize_sentences(text, 2);
    }
    if text.chars().count() < SNIPPET_MAX_CHARS {
        text.to_string()
    } else {
        let clipped: String = text.chars().take(SNIPPET_MAX_CHARS).collect();
        format!("{clipped}...")
    }
}
