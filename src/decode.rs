//! Tolerant decoder for JSON embedded in model output
//!
//! Models are asked for JSON but routinely wrap it in prose or markdown, leave
//! trailing commas, or get quoting slightly wrong. [`decode`] accepts the
//! following, tried in order:
//!
//! 1. A fenced block (```` ```json ```` or a bare ```` ``` ````) containing an object.
//! 2. Otherwise the first balanced `{ ... }` object; text before and after is ignored.
//!    A truncated object is cut at its last closing brace.
//! 3. If the candidate does not parse, repairs are applied cumulatively and the
//!    parse retried after each one:
//!    - trailing commas before `}` or `]` are removed,
//!    - typographic quotes are replaced with ASCII quotes,
//!    - bare object keys are quoted,
//!    - single-quoted strings become double-quoted.
//!
//! The result is [`Decoded::Complete`] when the JSON also matches the target
//! type, [`Decoded::Partial`] when it is valid JSON of another shape, and
//! [`Decoded::Abstain`] otherwise. Decoding never panics and never errors.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::OnceLock;

/// Outcome of decoding model output
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    /// JSON found and matched the target type
    Complete(T),
    /// JSON found but did not match the target type
    Partial(Value),
    /// No usable JSON
    Abstain(String),
}

impl<T> Decoded<T> {
    /// The typed value, if decoding was complete
    pub fn complete(self) -> Option<T> {
        match self {
            Decoded::Complete(value) => Some(value),
            _ => None,
        }
    }

    /// Whether the output should be treated as an abstention
    pub fn is_abstain(&self) -> bool {
        matches!(self, Decoded::Abstain(_))
    }
}

/// Decode model output into `T` following the tolerance rules above
pub fn decode<T: DeserializeOwned>(text: &str) -> Decoded<T> {
    let Some(value) = decode_value(text) else {
        return Decoded::Abstain(abstain_reason(text));
    };
    match serde_json::from_value::<T>(value.clone()) {
        Ok(typed) => Decoded::Complete(typed),
        Err(_) => Decoded::Partial(value),
    }
}

/// Extract and parse the first JSON object in `text`
pub fn decode_value(text: &str) -> Option<Value> {
    let candidate = extract_candidate(text)?;
    parse_with_repairs(&candidate)
}

fn abstain_reason(text: &str) -> String {
    if text.trim().is_empty() {
        "empty output".to_string()
    } else if !text.contains('{') {
        "no JSON object in output".to_string()
    } else {
        "JSON object could not be repaired".to_string()
    }
}

fn fence_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z]*\s*\n?(.*?)```").ok()).as_ref()
}

fn trailing_comma_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([}\]])").ok()).as_ref()
}

fn bare_key_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_\-]*)\s*:"#).ok()).as_ref()
}

fn single_quote_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"'([^'"\\]*)'"#).ok()).as_ref()
}

fn extract_candidate(text: &str) -> Option<String> {
    if let Some(fence) = fence_regex() {
        for caps in fence.captures_iter(text) {
            if let Some(body) = caps.get(1) {
                if let Some(object) = first_object(body.as_str()) {
                    return Some(object);
                }
            }
        }
    }
    first_object(text)
}

/// First balanced `{...}` in `text`, honouring string literals.
fn first_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }

    // Unbalanced: fall back to the last closing brace, if any
    let end = text.rfind('}')?;
    (end > start).then(|| text[start..=end].to_string())
}

/// `text` unchanged when the pattern is unavailable
fn replace_all(re: Option<&Regex>, text: &str, replacement: &str) -> String {
    match re {
        Some(re) => re.replace_all(text, replacement).into_owned(),
        None => text.to_string(),
    }
}

fn parse_with_repairs(candidate: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Some(value);
    }

    let repairs: [fn(&str) -> String; 4] = [
        |s| replace_all(trailing_comma_regex(), s, "$1"),
        |s| s.replace(['\u{201c}', '\u{201d}'], "\"").replace(['\u{2018}', '\u{2019}'], "'"),
        |s| replace_all(bare_key_regex(), s, r#"$1"$2":"#),
        |s| replace_all(single_quote_regex(), s, r#""$1""#),
    ];

    let mut current = candidate.to_string();
    for repair in repairs {
        current = repair(&current);
        if let Ok(value) = serde_json::from_str::<Value>(&current) {
            return Some(value);
        }
        // later repairs may reintroduce trailing commas next to fixed quotes
        let retrimmed = replace_all(trailing_comma_regex(), &current, "$1");
        if let Ok(value) = serde_json::from_str::<Value>(&retrimmed) {
            return Some(value);
        }
    }
    None
}
