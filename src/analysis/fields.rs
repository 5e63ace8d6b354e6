//! Card field parsing
//!
//! Both parsers return `None` rather than guess; the catalog treats every
//! field as an exact filter.

use once_cell::sync::Lazy;
use regex::Regex;

/// A capitalized word of at least three letters
static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z][a-z]{2,}\b").expect("static regex"));

/// `number/total`, capturing the number
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,3})/\d{2,4}").expect("static regex"));

/// Map glyphs OCR commonly confuses with digits: `I`, `l`, `|` to `1` and
/// `O`, `o` to `0`
pub fn correct_confusions(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'I' | 'l' | '|' => '1',
            'O' | 'o' => '0',
            other => other,
        })
        .collect()
}

/// Card name from raw OCR text.
///
/// Prefers the first capitalized word; otherwise the first non-blank line,
/// trimmed.
pub fn extract_name(text: &str) -> Option<String> {
    if let Some(m) = NAME_RE.find(text) {
        return Some(m.as_str().to_string());
    }

    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Collector number from raw OCR text, without the set total
pub fn extract_number(text: &str) -> Option<String> {
    let corrected = correct_confusions(text);
    NUMBER_RE
        .captures(&corrected)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
