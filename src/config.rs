//! Configuration types for register extraction.
//!
//! All behaviour is controlled through [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. Agent credentials live here as plain values
//! handed to the agent constructors in [`crate::agent::AgentSet::from_config`];
//! no agent reads process-global state.

use crate::error::RegisterError;
use crate::events::SharedSink;
use crate::record::RecordSchema;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for one extraction run.
///
/// # Example
/// ```rust
/// use parivar_extract::{ExtractionConfig, RemoteUiSettings};
///
/// let config = ExtractionConfig::builder()
///     .dpi(200)
///     .remote_ui(RemoteUiSettings::new("http://localhost:9515", "me@example.com", "secret"))
///     .provider_name("gemini")
///     .model("gemini-2.0-flash")
///     .build()
///     .unwrap();
/// assert!(config.verify);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Fields every record must carry. Default: the household register layout.
    pub schema: RecordSchema,

    /// Rendering DPI for PDF pages. Range: 72–400. Default: 200.
    ///
    /// Handwriting needs more pixels than print; 200 DPI keeps Devanagari
    /// matras legible without exceeding upload limits.
    pub dpi: u32,

    /// Cap on the longest rendered edge in pixels. Default: 2400.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-operation timeouts for the agents and the pipeline cap.
    pub timeouts: AgentTimeouts,

    /// Retries of the hosted model call on transient failure. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Sampling temperature for hosted model calls. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens generated per hosted model call. Default: 8192.
    pub max_tokens: usize,

    /// Run the verification pass after extraction. Default: true.
    pub verify: bool,

    /// Primary agent settings. Required by [`crate::agent::AgentSet::from_config`].
    pub remote_ui: Option<RemoteUiSettings>,

    /// Pre-constructed hosted model provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Hosted provider name (e.g. "gemini", "openai").
    pub provider_name: Option<String>,

    /// Hosted model identifier, e.g. "gemini-2.0-flash".
    pub model: Option<String>,

    /// Provider for the verification pass. Default: the hosted extraction provider.
    pub verify_provider_name: Option<String>,

    /// Model for the verification pass. Default: `model`.
    pub verify_model: Option<String>,

    /// Custom extraction prompt. If None, built from the schema.
    pub extraction_prompt: Option<String>,

    /// Which requester may start a run through [`crate::extract_for_requester`].
    pub access: AccessPolicy,

    /// Observer for progress and error events.
    pub event_sink: Option<SharedSink>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            schema: RecordSchema::default(),
            dpi: 200,
            max_rendered_pixels: 2400,
            password: None,
            pages: PageSelection::default(),
            download_timeout_secs: 120,
            timeouts: AgentTimeouts::default(),
            max_retries: 2,
            retry_backoff_ms: 500,
            temperature: 0.0,
            max_tokens: 8192,
            verify: true,
            remote_ui: None,
            provider: None,
            provider_name: None,
            model: None,
            verify_provider_name: None,
            verify_model: None,
            extraction_prompt: None,
            access: AccessPolicy::default(),
            event_sink: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("schema", &self.schema.keys().collect::<Vec<_>>())
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("pages", &self.pages)
            .field("timeouts", &self.timeouts)
            .field("max_retries", &self.max_retries)
            .field("verify", &self.verify)
            .field("remote_ui", &self.remote_ui)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("verify_model", &self.verify_model)
            .field("access", &self.access)
            .finish()
    }
}

impl ExtractionConfig {
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn schema(mut self, schema: RecordSchema) -> Self {
        self.config.schema = schema;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn timeouts(mut self, timeouts: AgentTimeouts) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn verify(mut self, v: bool) -> Self {
        self.config.verify = v;
        self
    }

    pub fn remote_ui(mut self, settings: RemoteUiSettings) -> Self {
        self.config.remote_ui = Some(settings);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn verify_provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.verify_provider_name = Some(name.into());
        self
    }

    pub fn verify_model(mut self, model: impl Into<String>) -> Self {
        self.config.verify_model = Some(model.into());
        self
    }

    pub fn extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.extraction_prompt = Some(prompt.into());
        self
    }

    pub fn allowed_requester(mut self, id: impl Into<String>) -> Self {
        self.config.access = AccessPolicy::single(id);
        self
    }

    pub fn event_sink(mut self, sink: SharedSink) -> Self {
        self.config.event_sink = Some(sink);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, RegisterError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(RegisterError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.schema.fields.is_empty() {
            return Err(RegisterError::InvalidConfig(
                "record schema must name at least one field".into(),
            ));
        }
        c.timeouts.validate()?;
        let t = &c.timeouts;
        let hosted = t.hosted_budget_secs(c.max_retries, c.retry_backoff_ms);
        if t.pipeline_secs < hosted {
            return Err(RegisterError::InvalidConfig(format!(
                "pipeline timeout {}s is below the hosted model's own budget of {}s \
                 ({} attempts of {}s plus backoff)",
                t.pipeline_secs,
                hosted,
                c.max_retries + 1,
                t.api_secs
            )));
        }
        if let Some(ref ui) = c.remote_ui {
            if !(ui.endpoint.starts_with("http://") || ui.endpoint.starts_with("https://")) {
                return Err(RegisterError::InvalidConfig(format!(
                    "remote UI endpoint must be an HTTP(S) URL, got '{}'",
                    ui.endpoint
                )));
            }
            if t.pipeline_secs < t.remote_ui_budget_secs() {
                return Err(RegisterError::InvalidConfig(format!(
                    "pipeline timeout {}s is below the remote UI session budget of {}s",
                    t.pipeline_secs,
                    t.remote_ui_budget_secs()
                )));
            }
        }
        Ok(self.config)
    }
}

/// Timeouts, in seconds, for every suspension point of an agent call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTimeouts {
    /// Opening a remote UI session. Default: 30.
    pub connect_secs: u64,
    /// Logging into the remote UI. Default: 15.
    pub login_secs: u64,
    /// Uploading the page image. Default: 30.
    pub upload_secs: u64,
    /// Submitting the prompt and waiting for the answer. Default: 45.
    pub response_secs: u64,
    /// Closing the remote session. Default: 10.
    pub close_secs: u64,
    /// One hosted model API call. Default: 60.
    pub api_secs: u64,
    /// Hard cap the page pipeline puts on any single agent invocation. Default: 300.
    pub pipeline_secs: u64,
}

impl Default for AgentTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            login_secs: 15,
            upload_secs: 30,
            response_secs: 45,
            close_secs: 10,
            api_secs: 60,
            pipeline_secs: 300,
        }
    }
}

impl AgentTimeouts {
    fn validate(&self) -> Result<(), RegisterError> {
        let all = [
            ("connect", self.connect_secs),
            ("login", self.login_secs),
            ("upload", self.upload_secs),
            ("response", self.response_secs),
            ("close", self.close_secs),
            ("api", self.api_secs),
            ("pipeline", self.pipeline_secs),
        ];
        if let Some((name, _)) = all.iter().find(|(_, secs)| *secs == 0) {
            return Err(RegisterError::InvalidConfig(format!(
                "{name} timeout must be at least 1s"
            )));
        }
        Ok(())
    }

    /// Longest one remote UI attempt can take, close included.
    pub fn remote_ui_budget_secs(&self) -> u64 {
        self.connect_secs
            .saturating_add(self.login_secs)
            .saturating_add(self.upload_secs)
            .saturating_add(self.response_secs.saturating_mul(2))
            .saturating_add(self.close_secs)
    }

    /// Longest one hosted model extraction can take across all its retries.
    pub fn hosted_budget_secs(&self, max_retries: u32, retry_backoff_ms: u64) -> u64 {
        let attempts = u64::from(max_retries).saturating_add(1);
        let backoff_ms = retry_backoff_ms
            .saturating_mul(2u64.saturating_pow(max_retries).saturating_sub(1));
        self.api_secs
            .saturating_mul(attempts)
            .saturating_add(backoff_ms.div_ceil(1000))
    }
}

/// Where and as whom the primary agent drives the remote chat UI.
#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteUiSettings {
    /// Base URL of the UI automation gateway.
    pub endpoint: String,
    pub email: String,
    pub password: String,
}

impl RemoteUiSettings {
    pub fn new(
        endpoint: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for RemoteUiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteUiSettings")
            .field("endpoint", &self.endpoint)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Binary access control: exactly one requester identity is accepted.
///
/// With no identity configured nobody is authorised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    allowed: Option<String>,
}

impl AccessPolicy {
    pub fn single(id: impl Into<String>) -> Self {
        Self {
            allowed: Some(id.into()),
        }
    }

    pub fn is_authorized(&self, requester: &str) -> bool {
        self.allowed.as_deref() == Some(requester)
    }
}

/// Specifies which pages of the PDF to extract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// All pages (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}
