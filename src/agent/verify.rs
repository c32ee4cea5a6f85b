//! Verification agent: a hosted model proof-reads the extracted records.
//!
//! The model gets the page image plus the candidates as JSON and returns a
//! corrected list. A reply that changes the number of records is rejected;
//! the verifier may correct values, never invent or drop people.

use super::hosted::{build_options, chat_with_retry};
use super::{ExtractionResult, VerificationAgent};
use crate::config::ExtractionConfig;
use crate::error::{AgentError, AgentErrorKind};
use crate::page::PageImage;
use crate::parser::parse_records;
use crate::pipeline::encode;
use crate::prompts::{verification_prompt, VERIFY_SYSTEM_PROMPT};
use crate::record::{Record, RecordSchema};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;

pub struct ModelVerifier {
    provider: Arc<dyn LLMProvider>,
    schema: RecordSchema,
    options: CompletionOptions,
    api_timeout_secs: u64,
}

impl ModelVerifier {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            schema: config.schema.clone(),
            options: build_options(config),
            api_timeout_secs: config.timeouts.api_secs,
        }
    }
}

#[async_trait]
impl VerificationAgent for ModelVerifier {
    fn name(&self) -> &str {
        "model-verifier"
    }

    async fn attempt(&self, image: &PageImage, candidates: &[Record]) -> ExtractionResult {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let image_data = encode::encode_page(image).await?;
        let messages = vec![
            ChatMessage::system(VERIFY_SYSTEM_PROMPT),
            ChatMessage::user_with_images(
                &verification_prompt(&self.schema, candidates),
                vec![image_data],
            ),
        ];

        let content = chat_with_retry(
            &self.provider,
            &messages,
            &self.options,
            0,
            0,
            self.api_timeout_secs,
        )
        .await?;

        let corrected = parse_records(&content)?;
        check_same_shape(candidates, &corrected)?;
        Ok(self.schema.normalize_all(corrected))
    }
}

fn check_same_shape(candidates: &[Record], corrected: &[Record]) -> Result<(), AgentError> {
    if candidates.len() != corrected.len() {
        return Err(AgentError::new(
            AgentErrorKind::MalformedOutput,
            format!(
                "verifier returned {} records for {} candidates",
                corrected.len(),
                candidates.len()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::record;

    #[test]
    fn same_length_is_accepted() {
        let a = vec![record([("name", "A")])];
        let b = vec![record([("name", "A."), ("dob", "01-01-2000")])];
        assert!(check_same_shape(&a, &b).is_ok());
    }

    #[test]
    fn dropped_record_is_rejected() {
        let a = vec![record([("name", "A")]), record([("name", "B")])];
        let err = check_same_shape(&a, &a[..1]).unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::MalformedOutput);
        assert!(err.detail.contains("1 records for 2"));
    }
}
