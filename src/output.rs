//! Result types returned by the extraction entry points.

use crate::error::PageError;
use crate::record::{Record, RecordSchema};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which rung of the ladder produced a page's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Primary,
    Secondary,
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentRole::Primary => f.write_str("primary"),
            AgentRole::Secondary => f.write_str("secondary"),
        }
    }
}

/// What happened to one page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageOutcome {
    /// 1-based page number.
    pub page_num: usize,

    /// Records contributed by this page, in the order the agent returned them.
    pub records: Vec<Record>,

    /// Agent whose output was kept. `None` when the page failed.
    pub agent: Option<AgentRole>,

    /// `true` when the verification pass succeeded and its output was used.
    pub verified: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PageError>,

    pub duration_ms: u64,
}

impl PageOutcome {
    pub fn failed(page_num: usize, error: PageError, duration_ms: u64) -> Self {
        Self {
            page_num,
            records: Vec::new(),
            agent: None,
            verified: false,
            error: Some(error),
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// PDF-level metadata, read without rendering pages.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// Counters for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionStats {
    /// Pages the run attempted (after page selection).
    pub total_pages: usize,
    pub primary_pages: usize,
    pub secondary_pages: usize,
    pub failed_pages: usize,
    pub verified_pages: usize,
    pub total_records: usize,
    pub total_duration_ms: u64,
}

impl ExtractionStats {
    pub fn from_outcomes(total_pages: usize, pages: &[PageOutcome], total_duration_ms: u64) -> Self {
        let mut stats = ExtractionStats {
            total_pages,
            total_duration_ms,
            ..Default::default()
        };
        for page in pages {
            match page.agent {
                Some(AgentRole::Primary) => stats.primary_pages += 1,
                Some(AgentRole::Secondary) => stats.secondary_pages += 1,
                None => {}
            }
            if !page.is_success() {
                stats.failed_pages += 1;
            }
            if page.verified {
                stats.verified_pages += 1;
            }
            stats.total_records += page.records.len();
        }
        stats
    }

    /// Pages that yielded records through either agent.
    pub fn succeeded_pages(&self) -> usize {
        self.primary_pages + self.secondary_pages
    }
}

/// The complete result of an extraction run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionOutput {
    /// Aggregate record list: each page's records, in page order.
    pub records: Vec<Record>,

    pub pages: Vec<PageOutcome>,

    pub stats: ExtractionStats,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DocumentMetadata>,

    /// `true` when the run stopped early on a cancellation request.
    #[serde(default)]
    pub cancelled: bool,
}

impl ExtractionOutput {
    /// Render the records as a GitHub-flavoured Markdown table.
    ///
    /// Columns follow `schema`; absent or blank values show the schema
    /// placeholder. Pipes inside values are escaped.
    pub fn to_markdown_table(&self, schema: &RecordSchema) -> String {
        let labels: Vec<&str> = schema.labels().collect();
        let mut out = String::new();
        out.push_str("| ");
        out.push_str(&labels.join(" | "));
        out.push_str(" |\n|");
        for _ in &labels {
            out.push_str(" --- |");
        }
        out.push('\n');

        for record in &self.records {
            let cells: Vec<String> = schema.row(record).into_iter().map(escape_cell).collect();
            out.push_str("| ");
            out.push_str(&cells.join(" | "));
            out.push_str(" |\n");
        }
        out
    }

    /// Pages that ended without records because of an error.
    pub fn failed_pages(&self) -> impl Iterator<Item = &PageOutcome> {
        self.pages.iter().filter(|p| !p.is_success())
    }
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}
