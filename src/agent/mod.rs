//! Agent capability contracts.
//!
//! An agent turns a page image into candidate records ([`ExtractionAgent`])
//! or refines records already extracted ([`VerificationAgent`]). The page
//! pipeline only ever sees these traits; how an agent reaches its back-end is
//! its own business.
//!
//! ## Variants
//!
//! | Role | Type | Back-end |
//! |------|------|----------|
//! | primary extraction | [`RemoteUiAgent`] | a chat web UI driven through a remote session |
//! | secondary extraction | [`HostedModelAgent`] | a hosted vision model API |
//! | verification | [`ModelVerifier`] | a hosted vision model seeded with the candidates |

pub mod hosted;
pub mod remote_ui;
pub mod verify;

pub use hosted::HostedModelAgent;
pub use remote_ui::{HttpUiConnector, RemoteUiAgent, UiConnector, UiSession};
pub use verify::ModelVerifier;

use crate::config::ExtractionConfig;
use crate::error::{panic_message, AgentError, AgentErrorKind, RegisterError};
use crate::events::Events;
use crate::page::PageImage;
use crate::prompts;
use crate::record::Record;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::debug;

/// Outcome of one agent invocation: the records, or why there are none.
pub type ExtractionResult = Result<Vec<Record>, AgentError>;

/// Reads records off a page image.
///
/// # Contract
/// * On success every record carries every schema key (missing source data
///   becomes the schema placeholder).
/// * On failure the [`AgentError`] detail is short and human-readable.
/// * Sessions, connections and other transient resources are released
///   before returning, on both paths.
/// * No state carries over between calls; a second agent can run on the
///   same image right after this one failed.
#[async_trait]
pub trait ExtractionAgent: Send + Sync {
    /// Short name used in events, e.g. `"remote-ui"`.
    fn name(&self) -> &str;

    async fn extract(&self, image: &PageImage) -> ExtractionResult;
}

/// Refines records using an independent source.
///
/// Implementors write [`attempt`](VerificationAgent::attempt), which may
/// fail. Callers use [`verify`](VerificationAgent::verify), which never
/// does: errors, timeouts and panics all degrade to the unchanged
/// candidates plus a warning event.
#[async_trait]
pub trait VerificationAgent: Send + Sync {
    fn name(&self) -> &str;

    async fn attempt(&self, image: &PageImage, candidates: &[Record]) -> ExtractionResult;

    async fn verify(
        &self,
        page_num: usize,
        image: &PageImage,
        candidates: Vec<Record>,
        limit: Duration,
        events: &Events,
    ) -> Vec<Record> {
        self.verify_reporting(page_num, image, candidates, limit, events)
            .await
            .records
    }

    /// Like [`verify`](VerificationAgent::verify), but also reports whether
    /// the corrections were applied.
    async fn verify_reporting(
        &self,
        page_num: usize,
        image: &PageImage,
        candidates: Vec<Record>,
        limit: Duration,
        events: &Events,
    ) -> Verification {
        let attempt = AssertUnwindSafe(self.attempt(image, &candidates)).catch_unwind();
        let failure = match timeout(limit, attempt).await {
            Ok(Ok(Ok(corrected))) => {
                debug!("Page {}: {} returned {} records", page_num, self.name(), corrected.len());
                return Verification {
                    records: corrected,
                    applied: true,
                };
            }
            Ok(Ok(Err(e))) => e,
            Ok(Err(payload)) => AgentError::new(AgentErrorKind::Panicked, panic_message(&*payload)),
            Err(_) => AgentError::timeout("verification", limit.as_secs()),
        };
        events.warn(
            page_num,
            format!(
                "Verification by {} failed ({}); keeping extracted records",
                self.name(),
                failure
            ),
        );
        Verification {
            records: candidates,
            applied: false,
        }
    }
}

/// Records after a verification pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub records: Vec<Record>,
    /// `false` when the verifier failed and the candidates came back unchanged.
    pub applied: bool,
}

/// The agents one run uses, in ladder order.
#[derive(Clone)]
pub struct AgentSet {
    pub primary: Arc<dyn ExtractionAgent>,
    pub secondary: Arc<dyn ExtractionAgent>,
    pub verifier: Option<Arc<dyn VerificationAgent>>,
}

impl AgentSet {
    pub fn new(primary: Arc<dyn ExtractionAgent>, secondary: Arc<dyn ExtractionAgent>) -> Self {
        Self {
            primary,
            secondary,
            verifier: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn VerificationAgent>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Build the standard ladder from configuration: remote UI → hosted
    /// model → model verifier (when `config.verify`).
    ///
    /// # Errors
    /// [`RegisterError::AgentNotConfigured`] without remote UI settings,
    /// [`RegisterError::ProviderNotConfigured`] when no hosted provider can
    /// be created.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, RegisterError> {
        let ui = config
            .remote_ui
            .as_ref()
            .ok_or_else(|| RegisterError::AgentNotConfigured {
                agent: "primary (remote UI)".to_string(),
                hint: "set the UI gateway endpoint, email and password".to_string(),
            })?;

        let prompt = config
            .extraction_prompt
            .clone()
            .unwrap_or_else(|| prompts::extraction_prompt(&config.schema));

        let connector = HttpUiConnector::new(ui.clone())?;
        let primary = RemoteUiAgent::new(
            Arc::new(connector),
            ui.clone(),
            config.schema.clone(),
            prompt.clone(),
            config.timeouts,
        );

        let provider = hosted::resolve_provider(config)?;
        let secondary = HostedModelAgent::new(Arc::clone(&provider), config, prompt);

        let mut set = AgentSet::new(Arc::new(primary), Arc::new(secondary));
        if config.verify {
            let verify_provider = hosted::resolve_verify_provider(config, &provider)?;
            set = set.with_verifier(Arc::new(ModelVerifier::new(verify_provider, config)));
        }
        Ok(set)
    }
}
