//! Turns a long reference document into one short, speakable sentence.
//!
//! Extraction strategies are tried in order and the first one that yields
//! usable text wins:
//!
//! 1. the "Overview" section
//! 2. the "Key Information" section
//! 3. the first paragraph after any heading
//! 4. the first sentence longer than 20 characters that is not a heading
//! 5. the first non-empty, non-heading line
//!
//! The winner is cut to its first sentence and may get one category-specific
//! fact appended. The result is never empty or punctuation-only.

use std::sync::LazyLock;

use coursechat_common::ContextCategory;
use regex::Regex;

pub const SAFE_FALLBACK: &str =
    "I'd be happy to help with that. Could you tell me a little more about what you'd like to know?";

const MAX_SUMMARY_CHARS: usize = 200;
const MIN_SENTENCE_CHARS: usize = 20;

static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("link regex should compile"));
static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*+]|\d+\.)\s+").expect("list regex should compile"));
static SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?]+[.!?]+").expect("sentence regex should compile"));
static CURRENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\s?\d[\d,]*(?:\.\d{2})?").expect("currency regex should compile")
});
static WEEKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,3})[-\s]weeks?\b").expect("weeks regex should compile")
});
static CADENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(daily|weekly|bi-?weekly|monthly|part-time|full-time)\b")
        .expect("cadence regex should compile")
});

type Strategy = fn(&str) -> Option<String>;

const STRATEGIES: [Strategy; 5] = [
    |doc| section(doc, "overview"),
    |doc| section(doc, "key information"),
    first_paragraph_after_heading,
    first_long_sentence,
    first_plain_line,
];

pub fn summarize_document(content: &str, category: Option<ContextCategory>) -> String {
    let summary = STRATEGIES
        .iter()
        .filter_map(|strategy| strategy(content))
        .map(|candidate| first_sentence(&clean_inline(&candidate)))
        .find(|candidate| is_usable(candidate));

    let Some(mut summary) = summary else {
        return SAFE_FALLBACK.to_string();
    };

    if let Some(fact) = category.and_then(|c| enrichment(c, content, &summary)) {
        summary.push(' ');
        summary.push_str(&fact);
    }
    summary
}

fn is_heading(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

fn heading_text(line: &str) -> &str {
    line.trim().trim_start_matches('#').trim().trim_end_matches(':')
}

/// Strip list markers from a body line.
fn plain_line(line: &str) -> String {
    LIST_MARKER.replace(line.trim(), "").into_owned()
}

fn join_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Option<String> {
    let joined = lines
        .map(plain_line)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.trim().is_empty()).then_some(joined)
}

fn section(doc: &str, name: &str) -> Option<String> {
    let mut lines = doc.lines().skip_while(|line| {
        !(is_heading(line) && heading_text(line).eq_ignore_ascii_case(name))
    });
    lines.next()?;
    join_lines(lines.take_while(|line| !is_heading(line)))
}

fn first_paragraph_after_heading(doc: &str) -> Option<String> {
    let mut lines = doc.lines().skip_while(|line| !is_heading(line));
    lines.next()?;
    join_lines(
        lines
            .skip_while(|line| line.trim().is_empty() || is_heading(line))
            .take_while(|line| !line.trim().is_empty() && !is_heading(line)),
    )
}

fn first_long_sentence(doc: &str) -> Option<String> {
    let body = join_lines(doc.lines().filter(|line| !is_heading(line)))?;
    SENTENCE
        .find_iter(&body)
        .map(|m| m.as_str().trim())
        .find(|s| s.chars().count() > MIN_SENTENCE_CHARS)
        .map(str::to_string)
}

fn first_plain_line(doc: &str) -> Option<String> {
    doc.lines()
        .filter(|line| !is_heading(line))
        .map(plain_line)
        .find(|line| !line.is_empty())
}

fn clean_inline(text: &str) -> String {
    let unlinked = LINK.replace_all(text, "$1");
    let stripped = unlinked.replace("**", "").replace("__", "").replace('`', "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut to the first sentence, ellipsizing anything past the length limit.
fn first_sentence(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let end = chars
        .iter()
        .enumerate()
        .position(|(i, c)| {
            matches!(*c, '.' | '!' | '?') && chars.get(i + 1).is_none_or(|n| n.is_whitespace())
        })
        .map(|i| i + 1)
        .unwrap_or(chars.len());

    if end <= MAX_SUMMARY_CHARS {
        return chars[..end].iter().collect::<String>().trim().to_string();
    }

    let cut: String = chars[..MAX_SUMMARY_CHARS - 3].iter().collect();
    let cut = match cut.rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => &cut[..pos],
        _ => cut.as_str(),
    };
    format!("{}...", cut.trim_end_matches([',', ';', ':', ' ']))
}

fn is_usable(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}

/// One extra fact pulled from the source document, if it is not already in
/// the summary.
fn enrichment(category: ContextCategory, doc: &str, summary: &str) -> Option<String> {
    match category {
        ContextCategory::Pricing => {
            let amount = CURRENCY.find(doc)?.as_str();
            (!summary.contains(amount)).then(|| format!("Tuition starts at {amount}."))
        }
        ContextCategory::Curriculum => {
            let weeks = WEEKS.captures(doc)?.get(1)?.as_str();
            (!WEEKS.is_match(summary)).then(|| format!("The program runs for {weeks} weeks."))
        }
        ContextCategory::Schedule => {
            let cadence = CADENCE.captures(doc)?.get(1)?.as_str().to_lowercase();
            (!summary.to_lowercase().contains(&cadence))
                .then(|| format!("Sessions are scheduled on a {cadence} basis."))
        }
        _ => None,
    }
}
