//! Recovers `{original, translation}` pairs from free-form model output.
//!
//! Strategies run in order: fence stripping, bracket slicing, strict JSON,
//! and only when strict JSON fails, a search for an embedded array followed by
//! line-by-line recovery.

use serde::Serialize;
use serde_json::Value;

const ORIGINAL_KEYS: &[&str] = &["original", "Original", "source", "Source"];
const TRANSLATION_KEYS: &[&str] = &["translation", "Translation", "target", "Target"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TranslationPair {
    pub original: String,
    pub translation: String,
}

impl TranslationPair {
    pub fn new(original: impl Into<String>, translation: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            translation: translation.into(),
        }
    }
}

/// Returns `None` when nothing structured could be recovered; a returned
/// vector is never empty.
pub fn parse_response<'a>(text: impl Into<Option<&'a str>>) -> Option<Vec<TranslationPair>> {
    let text = text.into()?;
    let candidate = extract_candidate(text);
    if candidate.is_empty() {
        return None;
    }
    let pairs = match serde_json::from_str::<Value>(candidate) {
        Ok(value) => pairs_from_value(value)?,
        Err(_) => find_embedded_array(candidate)
            .unwrap_or_else(|| recover_pairs_from_lines(candidate)),
    };
    if pairs.is_empty() { None } else { Some(pairs) }
}

fn extract_candidate(text: &str) -> &str {
    let mut candidate = text.trim();
    if let Some(inner) = strip_fence(candidate) {
        candidate = inner.trim();
    }
    if !(candidate.starts_with('[') && candidate.ends_with(']'))
        && let (Some(start), Some(end)) = (candidate.find('['), candidate.rfind(']'))
        && end > start
    {
        candidate = &candidate[start..=end];
    }
    candidate
}

/// Interior of the first fenced block: three backticks, an optional language
/// tag, a newline, then everything up to a newline followed by three
/// backticks.
fn strip_fence(text: &str) -> Option<&str> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find("```") {
        let open = search_from + offset;
        let after_ticks = open + 3;
        let rest = &text[after_ticks..];
        let tag_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '+'))
            .unwrap_or(rest.len());
        let after_tag = &rest[tag_len..];
        let body_start = if after_tag.starts_with("\r\n") {
            Some(after_ticks + tag_len + 2)
        } else if after_tag.starts_with('\n') {
            Some(after_ticks + tag_len + 1)
        } else {
            None
        };
        if let Some(body_start) = body_start {
            let body = &text[body_start..];
            // An empty block closes right after the opening line.
            if body.starts_with("```") {
                return Some("");
            }
            if let Some(close) = body.find("\n```") {
                return Some(body[..close].trim_end_matches('\r'));
            }
            return None;
        }
        search_from = after_ticks;
    }
    None
}

fn pairs_from_value(value: Value) -> Option<Vec<TranslationPair>> {
    let Value::Array(items) = value else {
        return None;
    };
    Some(items.iter().filter_map(normalize_pair).collect())
}

/// Maps any accepted key spelling onto the canonical pair. Non-object items
/// carry no pair.
fn normalize_pair(item: &Value) -> Option<TranslationPair> {
    let object = item.as_object()?;
    let lookup = |keys: &[&str]| {
        keys.iter()
            .filter_map(|key| object.get(*key))
            .find(|value| !value.is_null())
            .map(value_to_text)
            .unwrap_or_default()
    };
    Some(TranslationPair {
        original: lookup(ORIGINAL_KEYS),
        translation: lookup(TRANSLATION_KEYS),
    })
}

/// First `[` from which a complete JSON array with at least one non-empty
/// pair can be read. Covers commentary that itself contains brackets.
fn find_embedded_array(candidate: &str) -> Option<Vec<TranslationPair>> {
    candidate.match_indices('[').find_map(|(idx, _)| {
        let mut stream =
            serde_json::Deserializer::from_str(&candidate[idx..]).into_iter::<Value>();
        let Some(Ok(value)) = stream.next() else {
            return None;
        };
        pairs_from_value(value).filter(|pairs| {
            pairs
                .iter()
                .any(|pair| !pair.original.is_empty() || !pair.translation.is_empty())
        })
    })
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Original,
    Translation,
}

#[derive(Debug, Default)]
struct PendingPair {
    original: Option<String>,
    translation: Option<String>,
}

impl PendingPair {
    fn is_started(&self) -> bool {
        self.original.is_some() || self.translation.is_some()
    }

    fn take(&mut self) -> TranslationPair {
        let pending = std::mem::take(self);
        TranslationPair {
            original: pending.original.unwrap_or_default(),
            translation: pending.translation.unwrap_or_default(),
        }
    }
}

fn recover_pairs_from_lines(candidate: &str) -> Vec<TranslationPair> {
    let mut pairs = Vec::new();
    let mut pending = PendingPair::default();
    for raw in candidate.lines() {
        let line = raw.trim();
        if let Some(pair) = single_line_object(line) {
            if pending.is_started() {
                pairs.push(pending.take());
            }
            pairs.push(pair);
            continue;
        }
        match field_of_line(line) {
            Some(Field::Original) => pending.original = Some(extract_value(line)),
            Some(Field::Translation) => pending.translation = Some(extract_value(line)),
            None => {}
        }
        if is_object_boundary(line) && pending.is_started() {
            pairs.push(pending.take());
        }
    }
    if pending.is_started() {
        pairs.push(pending.take());
    }
    pairs
}

fn single_line_object(line: &str) -> Option<TranslationPair> {
    if !line.starts_with('{') {
        return None;
    }
    let object = line.strip_suffix(',').unwrap_or(line);
    let value = serde_json::from_str::<Value>(object).ok()?;
    normalize_pair(&value)
}

/// Matches lines shaped like `"original": ...`; the key may lack its closing
/// quote.
fn field_of_line(line: &str) -> Option<Field> {
    let rest = line.strip_prefix('"')?;
    let colon = rest.find(':')?;
    let key = rest[..colon].trim_end().trim_end_matches('"').trim();
    if ORIGINAL_KEYS.contains(&key) {
        Some(Field::Original)
    } else if TRANSLATION_KEYS.contains(&key) {
        Some(Field::Translation)
    } else {
        None
    }
}

fn is_object_boundary(line: &str) -> bool {
    matches!(line, "}" | "}," | "]" | "],")
}

fn extract_value(line: &str) -> String {
    if let Some(quoted) = quoted_value_at_end(line) {
        return decode_json_string(quoted);
    }
    let Some(colon) = line.find(':') else {
        return String::new();
    };
    let mut value = line[colon + 1..].trim();
    if let Some(stripped) = value.strip_suffix(',') {
        value = stripped;
    }
    // Either quote may be missing in truncated output.
    value = value.strip_prefix('"').unwrap_or(value);
    value = value.strip_suffix('"').unwrap_or(value);
    decode_json_string(value)
}

/// `: "value"` running to the end of the line, allowing a trailing comma.
fn quoted_value_at_end(line: &str) -> Option<&str> {
    line.match_indices(':').find_map(|(idx, _)| {
        let body = line[idx + 1..].trim_start().strip_prefix('"')?;
        let body = body.trim_end();
        let body = body.strip_suffix(',').unwrap_or(body).trim_end();
        body.strip_suffix('"')
    })
}

fn decode_json_string(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string())
}
