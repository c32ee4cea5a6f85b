//! # parivar-extract
//!
//! Extract household records from scanned Parivar Register PDFs.
//!
//! ## Why this crate?
//!
//! Family registers are handwritten Devanagari tables, scanned at varying
//! quality. No single OCR back-end reads them reliably, so each page goes
//! through a fallback ladder of vision agents and an optional proof-reading
//! pass. A page that defeats every agent contributes nothing; the rest of
//! the document still comes through.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Source    render one page at a time via pdfium (spawn_blocking)
//!  ├─ 3. Primary   remote chat UI session        ─┐
//!  ├─ 4. Secondary hosted vision model on failure ├─ per page, strictly sequential
//!  ├─ 5. Verify    hosted model proof-reads       ─┘
//!  └─ 6. Output    records in page order + per-page outcomes + stats
//! ```
//!
//! Progress, warnings and errors go to an [`EventSink`] as they happen.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parivar_extract::{extract, ExtractionConfig, RemoteUiSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Secondary agent auto-detected from GEMINI_API_KEY / OPENAI_API_KEY
//!     let config = ExtractionConfig::builder()
//!         .remote_ui(RemoteUiSettings::new("https://ui-gateway.example", "me@example.com", "secret"))
//!         .build()?;
//!     let output = extract("register.pdf", &config).await?;
//!     println!("{}", output.to_markdown_table(&config.schema));
//!     eprintln!("{} records, {} pages failed",
//!         output.stats.total_records,
//!         output.stats.failed_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `parivar` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! parivar-extract = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod agent;
pub mod config;
pub mod convert;
pub mod error;
pub mod events;
pub mod output;
pub mod page;
pub mod parser;
pub mod pipeline;
pub mod prompts;
pub mod record;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use agent::{AgentSet, ExtractionAgent, ExtractionResult, VerificationAgent};
pub use config::{
    AccessPolicy, AgentTimeouts, ExtractionConfig, ExtractionConfigBuilder, PageSelection,
    RemoteUiSettings,
};
pub use convert::{
    extract, extract_cancellable, extract_for_requester, extract_from_bytes, extract_sync,
    extract_to_file, extract_with_agents, inspect,
};
pub use error::{AgentError, AgentErrorKind, MalformedOutputError, PageError, RegisterError};
pub use events::{
    ChannelSink, CollectingSink, EventSink, NoopSink, PipelineEvent, Severity, SharedSink,
};
pub use output::{AgentRole, DocumentMetadata, ExtractionOutput, ExtractionStats, PageOutcome};
pub use page::{Page, PageImage};
pub use parser::parse_records;
pub use pipeline::{CancellationFlag, DocumentSource, ImageFileSource, PdfPageSource};
pub use record::{FieldSpec, Record, RecordSchema};
pub use stream::{extract_stream, stream_source, PageStream};
