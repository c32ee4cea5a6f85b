//! Error types for the parivar-extract library.
//!
//! Four error types, one per failure boundary:
//!
//! * [`RegisterError`]: **Fatal.** The run cannot obtain the document's
//!   page sequence at all (bad input file, wrong password, agent not
//!   configured). Returned as `Err(RegisterError)` from the top-level
//!   `extract*` functions.
//!
//! * [`PageError`]: **Non-fatal.** A single page produced no records
//!   (render glitch, both extraction agents failed, a defect inside the
//!   pipeline). Stored inside [`crate::output::PageOutcome`] so the rest of
//!   the document still comes through.
//!
//! * [`AgentError`]: the failure side of an [`crate::agent::ExtractionResult`].
//!   Carries a kind for branching and a length-bounded detail for humans.
//!
//! * [`MalformedOutputError`]: the structured-data parser rejected an agent
//!   response.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Maximum length (in characters) of a diagnostic cause carried by an [`AgentError`].
pub const MAX_CAUSE_CHARS: usize = 200;

/// All fatal errors returned by the parivar-extract library.
#[derive(Debug, Error)]
pub enum RegisterError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The page selection matched no page of the document.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    // ── Agent errors ──────────────────────────────────────────────────────
    /// The hosted model provider could not be created (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// A required extraction agent has no usable settings.
    #[error("{agent} agent is not configured: {hint}")]
    AgentNotConfigured { agent: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// The run continues; the page contributes zero records.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
pub enum PageError {
    /// The document source could not produce the page image.
    #[error("Page {page}: rendering failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// Both extraction agents failed.
    #[error("Page {page}: all extraction agents failed (primary: {primary}; secondary: {secondary})")]
    ExtractionFailed {
        page: usize,
        primary: String,
        secondary: String,
    },

    /// The page pipeline itself panicked.
    #[error("Page {page}: internal defect: {detail}")]
    Defect { page: usize, detail: String },
}

impl PageError {
    /// 1-based page number this error refers to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::ExtractionFailed { page, .. }
            | PageError::Defect { page, .. } => *page,
        }
    }
}

/// Coarse classification of an agent failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentErrorKind {
    /// Session could not be opened, logged into, or driven.
    Session,
    /// A bounded operation exceeded its timeout.
    Timeout,
    /// The agent answered, but not with a parseable record list.
    MalformedOutput,
    /// The hosted model API returned an error.
    Provider,
    /// Local I/O (reading the page image) failed.
    Io,
    /// The agent panicked.
    Panicked,
}

impl fmt::Display for AgentErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentErrorKind::Session => "session",
            AgentErrorKind::Timeout => "timeout",
            AgentErrorKind::MalformedOutput => "malformed output",
            AgentErrorKind::Provider => "provider",
            AgentErrorKind::Io => "io",
            AgentErrorKind::Panicked => "panicked",
        };
        f.write_str(s)
    }
}

/// Failure of a single agent invocation.
///
/// `detail` is for human diagnostics only and is always at most
/// [`MAX_CAUSE_CHARS`] characters long.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {detail}")]
pub struct AgentError {
    pub kind: AgentErrorKind,
    pub detail: String,
}

impl AgentError {
    pub fn new(kind: AgentErrorKind, detail: impl fmt::Display) -> Self {
        Self {
            kind,
            detail: truncate_cause(&detail.to_string(), MAX_CAUSE_CHARS),
        }
    }

    pub fn session(detail: impl fmt::Display) -> Self {
        Self::new(AgentErrorKind::Session, detail)
    }

    pub fn timeout(operation: &str, secs: u64) -> Self {
        Self::new(
            AgentErrorKind::Timeout,
            format!("{operation} timed out after {secs}s"),
        )
    }

    pub fn provider(detail: impl fmt::Display) -> Self {
        Self::new(AgentErrorKind::Provider, detail)
    }

    pub fn io(detail: impl fmt::Display) -> Self {
        Self::new(AgentErrorKind::Io, detail)
    }
}

/// The structured-data parser rejected an agent response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed agent output: {reason}")]
pub struct MalformedOutputError {
    pub reason: String,
}

impl MalformedOutputError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<MalformedOutputError> for AgentError {
    fn from(e: MalformedOutputError) -> Self {
        AgentError::new(AgentErrorKind::MalformedOutput, e.reason)
    }
}

/// Cut `s` down to at most `max` characters, marking the cut with `…`.
pub fn truncate_cause(s: &str, max: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('\u{2026}');
    out
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_reads_str_and_string() {
        let p: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*p), "boom");
        let p: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*p), "bang");
        let p: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*p), "unknown panic payload");
    }

    #[test]
    fn agent_error_detail_is_bounded() {
        let long = "x".repeat(5000);
        let e = AgentError::session(&long);
        assert_eq!(e.detail.chars().count(), MAX_CAUSE_CHARS);
        assert!(e.detail.ends_with('\u{2026}'));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let hindi = "परिवार रजिस्टर".repeat(40);
        let cut = truncate_cause(&hindi, 10);
        assert_eq!(cut.chars().count(), 10);
    }

    #[test]
    fn short_cause_is_untouched() {
        assert_eq!(truncate_cause("  login failed ", 50), "login failed");
    }

    #[test]
    fn malformed_output_converts_to_agent_error() {
        let e: AgentError = MalformedOutputError::new("expected a JSON array").into();
        assert_eq!(e.kind, AgentErrorKind::MalformedOutput);
        assert!(e.to_string().contains("expected a JSON array"));
    }

    #[test]
    fn extraction_failed_display_names_page() {
        let e = PageError::ExtractionFailed {
            page: 4,
            primary: "timeout: login timed out after 15s".into(),
            secondary: "provider: 503".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Page 4"), "got: {msg}");
        assert_eq!(e.page(), 4);
    }

    #[test]
    fn timeout_display() {
        let e = AgentError::timeout("response wait", 45);
        assert_eq!(e.kind, AgentErrorKind::Timeout);
        assert!(e.to_string().contains("45s"));
    }
}
