//! Progress/error events and the sink trait that receives them.
//!
//! Inject an [`Arc<dyn EventSink>`] into the pipeline to receive a
//! [`PipelineEvent`] at every decision point: page started, primary agent
//! failed, switched to the fallback agent, verification degraded, page
//! skipped, run complete.
//!
//! Sinks are fire-and-forget. [`Events`] wraps the injected sink, mirrors
//! every event to `tracing`, and contains a panicking sink so a broken
//! observer can never change what the pipeline does.
//!
//! # Example
//!
//! ```rust
//! use parivar_extract::events::{CollectingSink, Events, Severity};
//! use std::sync::Arc;
//!
//! let sink = Arc::new(CollectingSink::default());
//! let events = Events::new(sink.clone());
//! events.warn(2, "primary agent failed: timeout");
//! assert_eq!(sink.count(Severity::Warning), 1);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// How serious an event is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// One progress or error notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub severity: Severity,
    pub message: String,
    /// 1-based page number, when the event is about a single page.
    pub page: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(severity: Severity, page: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            page,
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.page {
            Some(p) => write!(f, "[{}] page {}: {}", self.severity, p, self.message),
            None => write!(f, "[{}] {}", self.severity, self.message),
        }
    }
}

/// Receives pipeline events.
///
/// Implementations must be `Send + Sync` and must not block: the pipeline
/// calls `emit` inline between agent invocations.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

/// Discards every event. The default when no sink is configured.
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &PipelineEvent) {}
}

/// Keeps every event in memory, in emission order.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.events
            .lock()
            .map(|e| e.iter().filter(|ev| ev.severity == severity).count())
            .unwrap_or(0)
    }

    /// Events about `page` (1-based).
    pub fn for_page(&self, page: usize) -> Vec<PipelineEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.page == Some(page))
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Forwards events to a tokio channel, e.g. the task that relays progress
/// to a chat front-end. A closed receiver is ignored.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &PipelineEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Shared handle type stored in [`crate::config::ExtractionConfig`].
pub type SharedSink = Arc<dyn EventSink>;

/// Emitter used inside the pipeline.
#[derive(Clone)]
pub struct Events {
    sink: SharedSink,
}

impl Default for Events {
    fn default() -> Self {
        Self::new(Arc::new(NoopSink))
    }
}

impl Events {
    pub fn new(sink: SharedSink) -> Self {
        Self { sink }
    }

    pub fn info(&self, page: impl Into<Option<usize>>, message: impl Into<String>) {
        self.emit(Severity::Info, page.into(), message.into());
    }

    pub fn warn(&self, page: impl Into<Option<usize>>, message: impl Into<String>) {
        self.emit(Severity::Warning, page.into(), message.into());
    }

    pub fn error(&self, page: impl Into<Option<usize>>, message: impl Into<String>) {
        self.emit(Severity::Error, page.into(), message.into());
    }

    fn emit(&self, severity: Severity, page: Option<usize>, message: String) {
        let event = PipelineEvent::new(severity, page, message);
        match severity {
            Severity::Info => info!("{}", event),
            Severity::Warning => warn!("{}", event),
            Severity::Error => error!("{}", event),
        }
        let sink = &self.sink;
        if catch_unwind(AssertUnwindSafe(|| sink.emit(&event))).is_err() {
            warn!("Event sink panicked; event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PanickingSink;

    impl EventSink for PanickingSink {
        fn emit(&self, _event: &PipelineEvent) {
            panic!("sink is broken");
        }
    }

    #[test]
    fn noop_sink_does_not_panic() {
        let events = Events::default();
        events.info(None, "run started");
        events.warn(1, "primary failed");
        events.error(1, "page skipped");
    }

    #[test]
    fn collecting_sink_keeps_order_and_pages() {
        let sink = Arc::new(CollectingSink::default());
        let events = Events::new(sink.clone());
        events.info(1, "a");
        events.warn(2, "b");
        events.error(None, "c");

        let all = sink.events();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].message, "a");
        assert_eq!(all[1].page, Some(2));
        assert_eq!(all[2].page, None);
        assert_eq!(sink.count(Severity::Warning), 1);
        assert_eq!(sink.for_page(2).len(), 1);
    }

    #[test]
    fn panicking_sink_is_contained() {
        let events = Events::new(Arc::new(PanickingSink));
        events.error(3, "still fine");
    }

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::new();
        let events = Events::new(Arc::new(sink));
        events.info(None, "hello");
        let ev = rx.recv().await.expect("event");
        assert_eq!(ev.severity, Severity::Info);
        assert_eq!(ev.message, "hello");
    }

    #[test]
    fn channel_sink_ignores_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        Events::new(Arc::new(sink)).warn(1, "nobody listening");
    }

    #[test]
    fn event_display_includes_page() {
        let ev = PipelineEvent::new(Severity::Warning, Some(7), "switching agent");
        assert_eq!(ev.to_string(), "[warning] page 7: switching agent");
    }
}
