//! Secondary agent: a hosted vision model reached through `edgequake-llm`.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 answers from hosted APIs are transient. Exponential
//! backoff (`retry_backoff_ms * 2^attempt`) gives 500 ms → 1 s with the
//! default two retries. A reply that arrives but does not parse is *not*
//! retried: the model read the page and produced garbage, and the ladder
//! treats that as this agent's failure.

use super::{ExtractionAgent, ExtractionResult};
use crate::config::ExtractionConfig;
use crate::error::{AgentError, RegisterError};
use crate::page::PageImage;
use crate::parser::parse_records;
use crate::pipeline::encode;
use crate::record::RecordSchema;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Model used when a provider is named without one.
pub fn default_model_for(provider: &str) -> &'static str {
    match provider {
        "gemini" | "google" => "gemini-2.0-flash",
        "anthropic" => "claude-sonnet-4-20250514",
        _ => "gpt-4.1-mini",
    }
}

/// The secondary extraction agent.
pub struct HostedModelAgent {
    provider: Arc<dyn LLMProvider>,
    schema: RecordSchema,
    prompt: String,
    options: CompletionOptions,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout_secs: u64,
}

impl HostedModelAgent {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig, prompt: String) -> Self {
        Self {
            provider,
            schema: config.schema.clone(),
            prompt,
            options: build_options(config),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout_secs: config.timeouts.api_secs,
        }
    }
}

#[async_trait]
impl ExtractionAgent for HostedModelAgent {
    fn name(&self) -> &str {
        "hosted-model"
    }

    async fn extract(&self, image: &PageImage) -> ExtractionResult {
        let image_data = encode::encode_page(image).await?;
        let messages = vec![ChatMessage::user_with_images(&self.prompt, vec![image_data])];

        let content = chat_with_retry(
            &self.provider,
            &messages,
            &self.options,
            self.max_retries,
            self.retry_backoff_ms,
            self.api_timeout_secs,
        )
        .await?;

        let records = parse_records(&content)?;
        Ok(self.schema.normalize_all(records))
    }
}

/// Send `messages`, retrying transient failures with exponential backoff.
/// Every attempt is bounded by `api_timeout_secs`.
pub(crate) async fn chat_with_retry(
    provider: &Arc<dyn LLMProvider>,
    messages: &[ChatMessage],
    options: &CompletionOptions,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout_secs: u64,
) -> Result<String, AgentError> {
    let mut last_err: Option<AgentError> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(retry_backoff_ms, attempt);
            warn!("Hosted model: retry {}/{} after {}ms", attempt, max_retries, backoff);
            sleep(Duration::from_millis(backoff)).await;
        }

        let call = provider.chat(messages, Some(options));
        match timeout(Duration::from_secs(api_timeout_secs), call).await {
            Ok(Ok(response)) => {
                debug!(
                    "Hosted model: {} input tokens, {} output tokens",
                    response.prompt_tokens, response.completion_tokens
                );
                return Ok(response.content);
            }
            Ok(Err(e)) => {
                warn!("Hosted model: attempt {} failed — {}", attempt + 1, e);
                last_err = Some(AgentError::provider(e));
            }
            Err(_) => {
                warn!("Hosted model: attempt {} timed out", attempt + 1);
                last_err = Some(AgentError::timeout("hosted model call", api_timeout_secs));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| AgentError::provider("no attempt was made")))
}

fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

pub(crate) fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Resolve the hosted provider, from most-specific to least-specific:
///
/// 1. a pre-built provider in `config.provider`
/// 2. `config.provider_name` (+ `config.model`)
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set
/// 4. `GEMINI_API_KEY` present → Gemini
/// 5. full auto-detection via [`ProviderFactory::from_env`]
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, RegisterError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(default_model_for(name));
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        if !key.is_empty() {
            let model = config.model.as_deref().unwrap_or(default_model_for("gemini"));
            return create_vision_provider("gemini", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| RegisterError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No hosted model provider could be auto-detected.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY, or --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// Provider for the verification pass: its own when configured, otherwise
/// the extraction provider.
pub fn resolve_verify_provider(
    config: &ExtractionConfig,
    extraction: &Arc<dyn LLMProvider>,
) -> Result<Arc<dyn LLMProvider>, RegisterError> {
    match (&config.verify_provider_name, &config.verify_model) {
        (Some(name), model) => {
            let model = model.as_deref().unwrap_or(default_model_for(name));
            create_vision_provider(name, model)
        }
        (None, Some(model)) => match config.provider_name {
            Some(ref name) => create_vision_provider(name, model),
            None => Ok(Arc::clone(extraction)),
        },
        (None, None) => Ok(Arc::clone(extraction)),
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, RegisterError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        RegisterError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
