//! Structured-data parser: the single normalisation point for agent output.
//!
//! Agents talk to language models and chat UIs, and neither reliably emits
//! clean JSON. Typical artefacts:
//!
//! - the array wrapped in ```` ```json ... ``` ```` fences
//! - a sentence of prose before or after the array
//! - numbers or `null` where strings were asked for
//!
//! [`parse_records`] strips the fences, locates the array, and converts
//! every element into a [`Record`]. Anything else is a
//! [`MalformedOutputError`]. Missing keys are *not* filled here; that is the
//! job of the agent contract ([`crate::record::RecordSchema::normalize`]).

use crate::error::MalformedOutputError;
use crate::record::Record;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[A-Za-z0-9_-]*").unwrap());

/// Parse a raw agent response into a list of records.
///
/// # Errors
/// [`MalformedOutputError`] when the text (after fence stripping) is empty,
/// is not valid JSON, has a non-array top level, or contains a non-object
/// element.
pub fn parse_records(raw: &str) -> Result<Vec<Record>, MalformedOutputError> {
    let cleaned = strip_fences(raw);
    if cleaned.is_empty() {
        return Err(MalformedOutputError::new("empty response"));
    }

    let value = match serde_json::from_str::<Value>(&cleaned) {
        Ok(v) => v,
        Err(first) => {
            let recovered = embedded_array(&cleaned).ok_or_else(|| {
                MalformedOutputError::new(format!("not valid JSON: {first}"))
            })?;
            debug!("Recovered JSON array from {} chars of noisy text", cleaned.len());
            recovered
        }
    };

    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(MalformedOutputError::new(format!(
                "expected a JSON array, got {}",
                kind_name(&other)
            )))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(map) => Ok(map
                .into_iter()
                .map(|(k, v)| (k, value_to_string(v)))
                .collect::<Record>()),
            other => Err(MalformedOutputError::new(format!(
                "element {i} is {}, expected an object",
                kind_name(&other)
            ))),
        })
        .collect()
}

/// Remove every code-fence marker (```` ```json ````, ```` ``` ````) and trim.
fn strip_fences(raw: &str) -> String {
    RE_FENCE.replace_all(raw, "").trim().to_string()
}

/// First complete JSON array embedded in `s`, preferring one made of objects.
fn embedded_array(s: &str) -> Option<Value> {
    let arrays: Vec<Value> = s
        .match_indices('[')
        .filter_map(|(start, _)| array_at(&s[start..]))
        .collect();
    let of_objects = arrays.iter().position(|v| match v {
        Value::Array(items) => items.iter().all(Value::is_object),
        _ => false,
    });
    arrays.into_iter().nth(of_objects.unwrap_or(0))
}

/// The JSON array opening at the start of `s`; trailing text is ignored.
fn array_at(s: &str) -> Option<Value> {
    let mut values = serde_json::Deserializer::from_str(s).into_iter::<Value>();
    match values.next() {
        Some(Ok(value @ Value::Array(_))) => Some(value),
        _ => None,
    }
}

fn value_to_string(v: Value) -> String {
    match v {
        Value::String(s) => s,
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        nested => nested.to_string(),
    }
}

fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_array() {
        let recs = parse_records(r#"[{"name":"A","gender":"M"}]"#).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0]["name"], "A");
    }

    #[test]
    fn strips_json_fences() {
        let raw = "```json\n[{\"name\": \"राम\"}, {\"name\": \"सीता\"}]\n```";
        let recs = parse_records(raw).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1]["name"], "सीता");
    }

    #[test]
    fn strips_bare_fences() {
        let raw = "```\n[]\n```\n";
        assert!(parse_records(raw).unwrap().is_empty());
    }

    #[test]
    fn recovers_array_from_prose() {
        let raw = "Here is the extracted data:\n[{\"name\":\"B\"}]\nLet me know if you need more.";
        let recs = parse_records(raw).unwrap();
        assert_eq!(recs[0]["name"], "B");
    }

    #[test]
    fn skips_bracketed_prose_before_the_array() {
        let raw = "Columns [name, dob] as requested:\n[{\"name\":\"C\",\"dob\":\"-\"}]\nDone [ok].";
        let recs = parse_records(raw).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0]["name"], "C");

        let raw = "Pages [1, 2] read. [{\"name\":\"D\"}]";
        assert_eq!(parse_records(raw).unwrap()[0]["name"], "D");
    }

    #[test]
    fn object_top_level_is_malformed() {
        let err = parse_records(r#"{"name":"A"}"#).unwrap_err();
        assert!(err.reason.contains("expected a JSON array"), "got: {err}");
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(parse_records("[{\"name\": }").is_err());
        assert!(parse_records("I could not read this page.").is_err());
    }

    #[test]
    fn empty_is_malformed() {
        let err = parse_records("```json\n```").unwrap_err();
        assert_eq!(err.reason, "empty response");
    }

    #[test]
    fn non_object_element_is_malformed() {
        let err = parse_records(r#"[{"name":"A"}, "B"]"#).unwrap_err();
        assert!(err.reason.contains("element 1"), "got: {err}");
    }

    #[test]
    fn scalars_are_stringified_and_missing_keys_left_alone() {
        let recs = parse_records(r#"[{"house_no": 12, "literacy": true, "caste": null}]"#).unwrap();
        let r = &recs[0];
        assert_eq!(r["house_no"], "12");
        assert_eq!(r["literacy"], "true");
        assert_eq!(r["caste"], "");
        assert!(r.get("name").is_none());
    }

    #[test]
    fn preserves_key_order() {
        let recs = parse_records(r#"[{"z":"1","a":"2","m":"3"}]"#).unwrap();
        let keys: Vec<&str> = recs[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }
}
