//! Prompts for the extraction and verification agents.
//!
//! Both prompts are generated from the [`RecordSchema`] so that changing the
//! register layout changes what every agent is asked for. Callers can replace
//! the extraction prompt via
//! [`crate::config::ExtractionConfig::extraction_prompt`].

use crate::record::{Record, RecordSchema};

/// Prompt sent with a page image to the extraction agents.
pub fn extraction_prompt(schema: &RecordSchema) -> String {
    let keys = schema.keys().collect::<Vec<_>>().join(", ");
    format!(
        "Extract this handwritten Hindi Parivar Register page into a JSON list. \
One object per household member, in the order they appear on the page. \
Keys: {keys}. \
Copy values exactly as written; use \"{placeholder}\" for blank or illegible cells. \
Output ONLY JSON.",
        placeholder = schema.placeholder
    )
}

/// System prompt for the verification pass.
pub const VERIFY_SYSTEM_PROMPT: &str = r#"You are a careful proof-reader of handwritten Hindi household registers.
You receive a register page image and a JSON list of records already extracted from it.

Rules:
1. Keep the same number of records, in the same order.
2. Keep every key of every record.
3. Only change a value when the image clearly shows it is wrong.
4. Normalise spelling of names consistently within the page.
5. Dates must be real calendar dates in DD-MM-YYYY form.
6. Output ONLY the corrected JSON list. No commentary, no fences."#;

/// User message for the verification pass: the candidates plus the fields
/// to double-check.
pub fn verification_prompt(schema: &RecordSchema, candidates: &[Record]) -> String {
    let json = serde_json::to_string_pretty(candidates).unwrap_or_else(|_| "[]".to_string());
    let focus = if schema.verify_fields.is_empty() {
        schema.keys().collect::<Vec<_>>().join(", ")
    } else {
        schema.verify_fields.join(", ")
    };
    format!(
        "Check these fields against the image: {focus}.\n\nExtracted records:\n\"\"\"{json}\"\"\""
    )
}
