//! Whole-document orchestration: every page through the ladder, in order.

use super::page::{report_skipped, PagePipeline};
use super::source::DocumentSource;
use crate::error::{panic_message, PageError};
use crate::events::Events;
use crate::output::{ExtractionOutput, ExtractionStats, PageOutcome};
use crate::page::Page;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Shared stop request, honoured between pages.
///
/// A page already in flight always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs a [`DocumentSource`] through a [`PagePipeline`].
pub struct DocumentPipeline {
    pages: PagePipeline,
}

impl DocumentPipeline {
    pub fn new(pages: PagePipeline) -> Self {
        Self { pages }
    }

    /// Process every page the source yields and aggregate the records.
    ///
    /// Never fails: per-page problems end up in [`PageOutcome::error`] and
    /// on the event sink.
    pub async fn run(
        &self,
        source: &mut dyn DocumentSource,
        events: &Events,
        cancel: &CancellationFlag,
    ) -> ExtractionOutput {
        let started = Instant::now();
        let total = source.page_count();
        let mut outcomes = Vec::with_capacity(total);
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() {
                events.warn(
                    None,
                    format!("Cancelled after {} of {} pages", outcomes.len(), total),
                );
                cancelled = true;
                break;
            }
            let Some(next) = source.next_page().await else {
                break;
            };
            outcomes.push(self.process(next, events).await);
        }

        let records = outcomes
            .iter()
            .flat_map(|o| o.records.iter().cloned())
            .collect();
        let stats = ExtractionStats::from_outcomes(
            total,
            &outcomes,
            started.elapsed().as_millis() as u64,
        );

        events.info(
            None,
            format!(
                "Finished: {} of {} pages extracted, {} records",
                stats.succeeded_pages(),
                total,
                stats.total_records
            ),
        );
        info!(
            "Document done in {}ms ({} primary, {} secondary, {} failed, {} verified)",
            stats.total_duration_ms,
            stats.primary_pages,
            stats.secondary_pages,
            stats.failed_pages,
            stats.verified_pages
        );

        ExtractionOutput {
            records,
            pages: outcomes,
            stats,
            metadata: None,
            cancelled,
        }
    }

    /// One page, with render failures and panics turned into outcomes.
    pub async fn process(
        &self,
        next: Result<Page, PageError>,
        events: &Events,
    ) -> PageOutcome {
        let page = match next {
            Ok(page) => page,
            Err(error) => {
                events.error(error.page(), error.to_string());
                report_skipped(events, error.page());
                return PageOutcome::failed(error.page(), error, 0);
            }
        };

        let page_num = page.page_num();
        let started = Instant::now();
        match AssertUnwindSafe(self.pages.run(page, events))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => {
                let error = PageError::Defect {
                    page: page_num,
                    detail: panic_message(&*payload),
                };
                events.error(page_num, error.to_string());
                report_skipped(events, page_num);
                PageOutcome::failed(page_num, error, started.elapsed().as_millis() as u64)
            }
        }
    }
}
