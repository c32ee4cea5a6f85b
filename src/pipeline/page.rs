//! The per-page fallback ladder.
//!
//! ```text
//! Start ──▶ Extracting(primary) ──ok──▶ Verifying ──▶ Done
//!                 │ err                     ▲
//!                 ▼                         │
//!           Extracting(secondary) ──ok──────┘
//!                 │ err
//!                 ▼
//!               Failed
//! ```
//!
//! Agents run strictly one after another on the same page image. Each
//! invocation is capped by the pipeline timeout on top of whatever limits the
//! agent enforces itself. Verification never fails a page.

use crate::agent::{AgentSet, ExtractionAgent, ExtractionResult};
use crate::error::{AgentError, PageError};
use crate::events::Events;
use crate::output::{AgentRole, PageOutcome};
use crate::page::Page;
use crate::record::Record;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::debug;

enum PageState {
    Start,
    Extracting(AgentRole),
    Verifying {
        agent: AgentRole,
        records: Vec<Record>,
    },
    Done {
        agent: AgentRole,
        records: Vec<Record>,
        verified: bool,
    },
    Failed(PageError),
}

/// Runs one page through the agent ladder.
#[derive(Clone)]
pub struct PagePipeline {
    agents: AgentSet,
    limit: Duration,
}

impl PagePipeline {
    /// `limit` caps every single agent invocation.
    pub fn new(agents: AgentSet, limit: Duration) -> Self {
        Self { agents, limit }
    }

    /// Process `page` and release its image, whatever the outcome.
    pub async fn run(&self, page: Page, events: &Events) -> PageOutcome {
        let started = Instant::now();
        let page_num = page.page_num();
        let mut primary_failure: Option<AgentError> = None;
        let mut state = PageState::Start;

        let (agent, records, verified) = loop {
            state = match state {
                PageState::Start => {
                    debug!("Page {}: starting extraction", page_num);
                    PageState::Extracting(AgentRole::Primary)
                }

                PageState::Extracting(AgentRole::Primary) => {
                    match self.invoke(&*self.agents.primary, &page).await {
                        Ok(records) => PageState::Verifying {
                            agent: AgentRole::Primary,
                            records,
                        },
                        Err(e) => {
                            events.warn(
                                page_num,
                                format!(
                                    "Primary agent {} failed ({}); trying {}",
                                    self.agents.primary.name(),
                                    e,
                                    self.agents.secondary.name()
                                ),
                            );
                            primary_failure = Some(e);
                            PageState::Extracting(AgentRole::Secondary)
                        }
                    }
                }

                PageState::Extracting(AgentRole::Secondary) => {
                    match self.invoke(&*self.agents.secondary, &page).await {
                        Ok(records) => PageState::Verifying {
                            agent: AgentRole::Secondary,
                            records,
                        },
                        Err(e) => {
                            let primary = primary_failure
                                .take()
                                .map(|p| p.to_string())
                                .unwrap_or_default();
                            PageState::Failed(PageError::ExtractionFailed {
                                page: page_num,
                                primary,
                                secondary: e.to_string(),
                            })
                        }
                    }
                }

                PageState::Verifying { agent, records } => match &self.agents.verifier {
                    Some(verifier) => {
                        let pass = verifier
                            .verify_reporting(page_num, page.image(), records, self.limit, events)
                            .await;
                        PageState::Done {
                            agent,
                            records: pass.records,
                            verified: pass.applied,
                        }
                    }
                    None => PageState::Done {
                        agent,
                        records,
                        verified: false,
                    },
                },

                PageState::Done {
                    agent,
                    records,
                    verified,
                } => break (Some(agent), records, verified),

                PageState::Failed(error) => {
                    events.error(page_num, error.to_string());
                    report_skipped(events, page_num);
                    page.into_image().release();
                    return PageOutcome::failed(page_num, error, elapsed_ms(started));
                }
            };
        };

        page.into_image().release();
        let role = agent.map(|a| a.to_string()).unwrap_or_default();
        events.info(
            page_num,
            format!(
                "Extracted {} records ({} agent{})",
                records.len(),
                role,
                if verified { ", verified" } else { "" }
            ),
        );

        PageOutcome {
            page_num,
            records,
            agent,
            verified,
            error: None,
            duration_ms: elapsed_ms(started),
        }
    }

    async fn invoke(&self, agent: &dyn ExtractionAgent, page: &Page) -> ExtractionResult {
        match timeout(self.limit, agent.extract(page.image())).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::timeout(
                &format!("{} extraction", agent.name()),
                self.limit.as_secs(),
            )),
        }
    }
}

/// Terminal info event for a page that contributes no records.
pub(crate) fn report_skipped(events: &Events, page_num: usize) {
    events.info(page_num, format!("Page {} skipped: no records", page_num));
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
