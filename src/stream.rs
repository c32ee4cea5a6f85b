//! Streaming extraction API: emit page outcomes as they complete.
//!
//! Large registers take minutes; a stream lets a chat front-end post each
//! page's households as soon as they are ready instead of waiting for the
//! whole document. Pages are still processed strictly one at a time and
//! arrive in document order; nothing runs until the stream is polled.

use crate::agent::AgentSet;
use crate::config::ExtractionConfig;
use crate::convert::events_for;
use crate::error::RegisterError;
use crate::events::Events;
use crate::output::PageOutcome;
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::{
    render, CancellationFlag, DocumentPipeline, DocumentSource, PagePipeline, PdfPageSource,
};
use futures::stream;
use std::pin::Pin;
use tokio::time::Duration;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of page outcomes, in page order.
pub type PageStream = Pin<Box<dyn Stream<Item = PageOutcome> + Send>>;

struct StreamState {
    source: Box<dyn DocumentSource>,
    pipeline: DocumentPipeline,
    events: Events,
    cancel: CancellationFlag,
    done: usize,
    // Keeps a downloaded PDF on disk until the stream is dropped.
    _input: Option<ResolvedInput>,
}

/// Extract a register PDF, yielding each page's outcome as it completes.
///
/// # Errors
/// The same fatal errors as [`crate::convert::extract`], reported before the
/// first page is processed.
pub async fn extract_stream(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
    cancel: CancellationFlag,
) -> Result<PageStream, RegisterError> {
    let input_str = input_str.as_ref();
    info!("Starting streaming extraction: {}", input_str);

    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let agents = AgentSet::from_config(config)?;

    let metadata = render::extract_metadata(resolved.path(), config.password.as_deref()).await?;
    let source = PdfPageSource::with_page_count(resolved.path(), metadata.page_count, config)?;

    Ok(stream_pages(Box::new(source), agents, config, cancel, Some(resolved)))
}

/// Stream an arbitrary page source through an explicit agent ladder.
pub fn stream_source(
    source: Box<dyn DocumentSource>,
    agents: AgentSet,
    config: &ExtractionConfig,
    cancel: CancellationFlag,
) -> PageStream {
    stream_pages(source, agents, config, cancel, None)
}

fn stream_pages(
    source: Box<dyn DocumentSource>,
    agents: AgentSet,
    config: &ExtractionConfig,
    cancel: CancellationFlag,
    input: Option<ResolvedInput>,
) -> PageStream {
    let limit = Duration::from_secs(config.timeouts.pipeline_secs);
    let state = StreamState {
        source,
        pipeline: DocumentPipeline::new(PagePipeline::new(agents, limit)),
        events: events_for(config),
        cancel,
        done: 0,
        _input: input,
    };

    let s = stream::unfold(state, |mut st| async move {
        let total = st.source.page_count();
        if st.cancel.is_cancelled() {
            st.events.warn(
                None,
                format!("Cancelled after {} of {} pages", st.done, total),
            );
            return None;
        }
        let Some(next) = st.source.next_page().await else {
            st.events.info(None, format!("Finished streaming {} pages", st.done));
            return None;
        };
        let outcome = st.pipeline.process(next, &st.events).await;
        st.done += 1;
        Some((outcome, st))
    });

    Box::pin(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ExtractionAgent, ExtractionResult};
    use crate::error::AgentError;
    use crate::page::PageImage;
    use crate::pipeline::ImageFileSource;
    use crate::record::record;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::Arc;

    struct NameFromFile;

    #[async_trait]
    impl ExtractionAgent for NameFromFile {
        fn name(&self) -> &str {
            "file-name"
        }

        async fn extract(&self, image: &PageImage) -> ExtractionResult {
            let bytes = image.read_bytes().await.map_err(AgentError::io)?;
            Ok(vec![record([("name", String::from_utf8_lossy(&bytes).to_string())])])
        }
    }

    fn sources(names: &[&str]) -> (tempfile::TempDir, ImageFileSource) {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<_> = names
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let p = dir.path().join(format!("{i}.png"));
                std::fs::write(&p, n).unwrap();
                p
            })
            .collect();
        (dir, ImageFileSource::new(paths))
    }

    #[tokio::test]
    async fn pages_arrive_in_order() {
        let (_dir, source) = sources(&["A", "B", "C"]);
        let agent: Arc<dyn ExtractionAgent> = Arc::new(NameFromFile);
        let stream = stream_source(
            Box::new(source),
            AgentSet::new(Arc::clone(&agent), agent),
            &ExtractionConfig::default(),
            CancellationFlag::new(),
        );

        let outcomes: Vec<PageOutcome> = stream.collect().await;
        let nums: Vec<usize> = outcomes.iter().map(|o| o.page_num).collect();
        assert_eq!(nums, [1, 2, 3]);
        assert_eq!(outcomes[2].records[0]["name"], "C");
    }

    #[tokio::test]
    async fn cancel_between_pages_ends_stream() {
        let (_dir, source) = sources(&["A", "B", "C"]);
        let agent: Arc<dyn ExtractionAgent> = Arc::new(NameFromFile);
        let cancel = CancellationFlag::new();
        let mut stream = stream_source(
            Box::new(source),
            AgentSet::new(Arc::clone(&agent), agent),
            &ExtractionConfig::default(),
            cancel.clone(),
        );

        let first = stream.next().await.unwrap();
        assert_eq!(first.page_num, 1);
        cancel.cancel();
        assert!(stream.next().await.is_none());
    }
}
