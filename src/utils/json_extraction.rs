//! JSON extraction from LLM responses.
//!
//! Generators often wrap the pipeline JSON in markdown fences or surround it
//! with explanation. Extraction tries, in order:
//! 1. a ```json fenced block
//! 2. any fenced block containing an object
//! 3. the whole response, when it is an object
//! 4. the largest valid object anywhere, preferring later ones
//!
//! When none succeeds, an unbalanced opening brace is reported as truncation
//! so the caller can tell a cut-off response from one with no JSON at all.

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// Why no JSON object could be extracted.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated ({unclosed_braces} unclosed braces, {unclosed_brackets} unclosed brackets): {partial_preview}...")]
    Truncated {
        partial_preview: String,
        unclosed_braces: usize,
        unclosed_brackets: usize,
    },

    #[error("No JSON object found in response starting with '{content_preview}'")]
    NotFound { content_preview: String },
}

const PREVIEW_CHARS: usize = 80;

fn preview(s: &str) -> String {
    s.chars().take(PREVIEW_CHARS).collect()
}

/// Extracts the pipeline JSON object from a response.
pub fn extract_json_object(content: &str) -> Result<Value, JsonExtractionError> {
    let trimmed = content.trim();

    let candidates = [
        fenced_block(trimmed, r"```json\s*\n?([\s\S]*?)\n?```"),
        fenced_block(trimmed, r"```(?:\w+)?\s*\n?([\s\S]*?)\n?```"),
        Some(trimmed.to_string()),
    ];
    for candidate in candidates.into_iter().flatten() {
        if let Some(value) = parse_object(&candidate) {
            return Ok(value);
        }
    }

    if let Some(value) = largest_object(trimmed) {
        return Ok(value);
    }

    match trimmed.find('{') {
        Some(start) => {
            let (braces, brackets, in_string) = unclosed(&trimmed[start..]);
            if braces > 0 || brackets > 0 || in_string {
                return Err(JsonExtractionError::Truncated {
                    partial_preview: preview(&trimmed[start..]),
                    unclosed_braces: braces,
                    unclosed_brackets: brackets,
                });
            }
            Err(JsonExtractionError::NotFound {
                content_preview: preview(trimmed),
            })
        }
        None => Err(JsonExtractionError::NotFound {
            content_preview: preview(trimmed),
        }),
    }
}

fn fenced_block(content: &str, pattern: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    let caps = re.captures(content)?;
    let inner = caps.get(1)?.as_str().trim();
    let start = inner.find('{')?;
    let end = find_matching_brace(&inner[start..])?;
    Some(inner[start..=start + end].to_string())
}

fn parse_object(candidate: &str) -> Option<Value> {
    let start = candidate.find('{')?;
    if !candidate[..start].trim().is_empty() {
        return None;
    }
    let end = find_matching_brace(&candidate[start..])?;
    serde_json::from_str::<Value>(&candidate[start..=start + end])
        .ok()
        .filter(Value::is_object)
}

/// Largest parseable object in `content`; later objects win ties.
fn largest_object(content: &str) -> Option<Value> {
    let mut best: Option<(usize, Value)> = None;

    for (start, _) in content.char_indices().filter(|(_, c)| *c == '{') {
        let Some(end) = find_matching_brace(&content[start..]) else {
            continue;
        };
        let len = end + 1;
        if best.as_ref().map(|(l, _)| len < *l).unwrap_or(false) {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(&content[start..start + len]) {
            best = Some((len, value));
        }
    }

    best.map(|(_, value)| value)
}

/// Index of the brace closing the object that `s` starts with.
///
/// Braces inside string literals, including escaped quotes, are ignored.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Counts unclosed braces and brackets, and whether a string is left open.
fn unclosed(s: &str) -> (usize, usize, bool) {
    let mut braces: isize = 0;
    let mut brackets: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => braces += 1,
            '}' if !in_string => braces -= 1,
            '[' if !in_string => brackets += 1,
            ']' if !in_string => brackets -= 1,
            _ => {}
        }
    }

    (braces.max(0) as usize, brackets.max(0) as usize, in_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_object() {
        let value = extract_json_object(r#"{"operations": []}"#).expect("extract");
        assert_eq!(value, json!({"operations": []}));
    }

    #[test]
    fn test_json_fence_with_prose() {
        let response = "Here is the pipeline:\n```json\n{\"operations\": [{\"kind\": \"sort\", \"by\": \"a\"}]}\n```\nDone.";
        let value = extract_json_object(response).expect("extract");
        assert_eq!(value["operations"][0]["kind"], json!("sort"));
    }

    #[test]
    fn test_generic_fence() {
        let response = "```\n{\"operations\": []}\n```";
        assert!(extract_json_object(response).is_ok());
    }

    #[test]
    fn test_prefers_largest_object_after_reasoning() {
        let response = r#"I considered {"x": 1} but settled on {"operations": [{"kind": "sort", "by": "a"}]}"#;
        let value = extract_json_object(response).expect("extract");
        assert!(value.get("operations").is_some());
    }

    #[test]
    fn test_braces_in_strings() {
        let s = r#"{"pattern": "a{2}\"}", "n": 1} trailing"#;
        assert_eq!(find_matching_brace(s), Some(s.find(" trailing").expect("marker") - 1));
    }

    #[test]
    fn test_truncated_response() {
        let err = extract_json_object(r#"{"operations": [{"kind": "sort""#).unwrap_err();
        match err {
            JsonExtractionError::Truncated {
                unclosed_braces,
                unclosed_brackets,
                ..
            } => {
                assert_eq!(unclosed_braces, 2);
                assert_eq!(unclosed_brackets, 1);
            }
            other => panic!("Expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn test_no_json() {
        let err = extract_json_object("I cannot help with that.").unwrap_err();
        assert!(matches!(err, JsonExtractionError::NotFound { .. }));
    }
}
