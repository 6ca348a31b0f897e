//! Structured-output recovery for generative model responses.
//!
//! Models are asked to reply with a single JSON object but frequently wrap
//! it in markdown fences or surround it with prose. [`extract_json_object`]
//! strips fencing, takes the greedy span from the first `{` to the last
//! `}`, and falls back to the first balanced `{...}` span when the greedy
//! span does not parse. Anything else is a [`NoStructuredOutput`] failure;
//! callers never receive a defaulted value.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// The model response did not contain a parseable JSON object.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no structured output in model response: {reason}")]
pub struct NoStructuredOutput {
    pub reason: String,
}

impl NoStructuredOutput {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Return the body of the first fenced code block, or `text` unchanged.
pub fn strip_code_fences(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after_open = &text[open + 3..];
    // Skip the info string (e.g. `json`) up to the end of the fence line.
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    }
}

/// Extract the JSON object embedded in a model response.
pub fn extract_json_object(text: &str) -> Result<Value, NoStructuredOutput> {
    let unfenced = strip_code_fences(text);
    match parse_object_span(unfenced) {
        Ok(v) => Ok(v),
        // A fence may have contained something other than the payload.
        Err(_) if unfenced.len() != text.len() => parse_object_span(text),
        Err(e) => Err(e),
    }
}

/// Extract and deserialize the embedded JSON object into `T`.
pub fn extract_typed<T: DeserializeOwned>(text: &str) -> Result<T, NoStructuredOutput> {
    let value = extract_json_object(text)?;
    serde_json::from_value(value)
        .map_err(|e| NoStructuredOutput::new(format!("unexpected shape: {}", e)))
}

fn parse_object_span(text: &str) -> Result<Value, NoStructuredOutput> {
    let start = text
        .find('{')
        .ok_or_else(|| NoStructuredOutput::new("no '{' found"))?;
    let end = text
        .rfind('}')
        .filter(|&end| end > start)
        .ok_or_else(|| NoStructuredOutput::new("no closing '}' found"))?;

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&text[start..=end]) {
        return Ok(value);
    }

    let balanced = balanced_span(&text[start..])
        .ok_or_else(|| NoStructuredOutput::new("unbalanced braces"))?;
    match serde_json::from_str::<Value>(balanced) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(NoStructuredOutput::new("top-level value is not an object")),
        Err(e) => Err(NoStructuredOutput::new(format!("malformed JSON: {}", e))),
    }
}

/// The shortest prefix of `text` (which starts with `{`) whose braces balance,
/// ignoring braces inside string literals.
fn balanced_span(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAYLOAD: &str = r#"{"apis":[{"name":"Users API","base_url":"https://x","auth_type":"basic","endpoints":[{"method":"GET","path":"/users","parameters":[]}]}]}"#;

    fn expected_apis() -> Value {
        json!([{
            "name": "Users API",
            "base_url": "https://x",
            "auth_type": "basic",
            "endpoints": [{"method": "GET", "path": "/users", "parameters": []}]
        }])
    }

    #[test]
    fn bare_object() {
        let v = extract_json_object(PAYLOAD).unwrap();
        assert_eq!(v["apis"], expected_apis());
    }

    #[test]
    fn fenced_with_language_tag() {
        let text = format!("```json\n{}\n```", PAYLOAD);
        assert_eq!(extract_json_object(&text).unwrap()["apis"], expected_apis());
    }

    #[test]
    fn surrounded_by_prose() {
        let text = format!(
            "Here is the catalog you asked for:\n\n```\n{}\n```\nLet me know if you need more.",
            PAYLOAD
        );
        assert_eq!(extract_json_object(&text).unwrap()["apis"], expected_apis());
    }

    #[test]
    fn trailing_prose_with_braces_falls_back_to_balanced_span() {
        let text = format!("{} -- note: paths like /users/{{id}} were skipped", PAYLOAD);
        assert_eq!(extract_json_object(&text).unwrap()["apis"], expected_apis());
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_scanner() {
        let text = r#"prefix {"a":"}{","b":1} suffix }"#;
        let v = extract_json_object(text).unwrap();
        assert_eq!(v, json!({"a": "}{", "b": 1}));
    }

    #[test]
    fn no_object_is_an_error() {
        let err = extract_json_object("I could not find any APIs.").unwrap_err();
        assert!(err.reason.contains("no '{'"));
    }

    #[test]
    fn truncated_object_is_an_error() {
        assert!(extract_json_object(r#"{"apis": [{"name": "x""#).is_err());
    }

    #[test]
    fn typed_extraction_reports_shape_errors() {
        #[derive(serde::Deserialize, Debug)]
        #[allow(dead_code)]
        struct Shape {
            apis: Vec<String>,
        }
        let err = extract_typed::<Shape>(r#"{"apis": 3}"#).unwrap_err();
        assert!(err.reason.contains("unexpected shape"));
    }
}
