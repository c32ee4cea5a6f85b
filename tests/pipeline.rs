//! Orchestration tests: the agent ladder over whole documents.
//!
//! Pages are small image files fed through `ImageFileSource`; the agents
//! are scripted mocks keyed on each page image's contents, so these tests
//! need neither pdfium nor network access.

use async_trait::async_trait;
use parivar_extract::agent::{AgentSet, ExtractionAgent, ExtractionResult, VerificationAgent};
use parivar_extract::record::record;
use parivar_extract::{
    extract_with_agents, AgentError, AgentRole, CancellationFlag, ChannelSink, CollectingSink,
    EventSink, ExtractionConfig, ExtractionOutput, ImageFileSource, PageError, PageImage,
    PipelineEvent, Record, Severity,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Answers according to the page image's text content.
struct Scripted {
    name: &'static str,
    replies: HashMap<String, ExtractionResult>,
    calls: Mutex<Vec<String>>,
    seen_paths: Mutex<Vec<PathBuf>>,
}

impl Scripted {
    fn new(name: &'static str, replies: Vec<(&str, ExtractionResult)>) -> Arc<Self> {
        Arc::new(Self {
            name,
            replies: replies
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            calls: Mutex::new(Vec::new()),
            seen_paths: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExtractionAgent for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    async fn extract(&self, image: &PageImage) -> ExtractionResult {
        let key = String::from_utf8(image.read_bytes().await.unwrap()).unwrap();
        self.calls.lock().unwrap().push(key.clone());
        self.seen_paths
            .lock()
            .unwrap()
            .push(image.path().to_path_buf());
        self.replies
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Err(AgentError::session(format!("no script for {key}"))))
    }
}

#[async_trait]
impl VerificationAgent for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    async fn attempt(&self, image: &PageImage, _candidates: &[Record]) -> ExtractionResult {
        ExtractionAgent::extract(self, image).await
    }
}

struct Doc {
    _dir: tempfile::TempDir,
    paths: Vec<PathBuf>,
}

impl Doc {
    fn new(pages: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = pages
            .iter()
            .enumerate()
            .map(|(i, content)| {
                let p = dir.path().join(format!("page-{}.png", i + 1));
                std::fs::write(&p, content).unwrap();
                p
            })
            .collect();
        Doc { _dir: dir, paths }
    }

    fn source(&self) -> ImageFileSource {
        ImageFileSource::new(self.paths.clone())
    }
}

fn config_with(sink: Arc<dyn EventSink>) -> ExtractionConfig {
    ExtractionConfig::builder().event_sink(sink).build().unwrap()
}

async fn run(doc: &Doc, agents: AgentSet, sink: Arc<dyn EventSink>) -> ExtractionOutput {
    let mut source = doc.source();
    extract_with_agents(&mut source, agents, &config_with(sink), &CancellationFlag::new()).await
}

fn ok(names: &[&str]) -> ExtractionResult {
    Ok(names.iter().map(|n| record([("name", *n)])).collect())
}

fn all_gone(paths: &[PathBuf]) -> bool {
    paths.iter().all(|p: &PathBuf| !Path::new(p).exists())
}

// ── Properties ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_page_example_run() {
    let doc = Doc::new(&["p1", "p2"]);
    let primary = Scripted::new(
        "primary",
        vec![("p1", ok(&["A"])), ("p2", Err(AgentError::timeout("response wait", 45)))],
    );
    let secondary = Scripted::new("secondary", vec![("p2", ok(&["B"]))]);
    let verifier = Scripted::new(
        "verifier",
        vec![
            ("p1", Ok(vec![record([("name", "A"), ("dob", "01-01-2000")])])),
            ("p2", Err(AgentError::provider("503 Service Unavailable"))),
        ],
    );
    let sink = Arc::new(CollectingSink::default());

    let out = run(
        &doc,
        AgentSet::new(primary.clone(), secondary.clone()).with_verifier(verifier.clone()),
        sink.clone(),
    )
    .await;

    assert_eq!(
        out.records,
        vec![
            record([("name", "A"), ("dob", "01-01-2000")]),
            record([("name", "B")]),
        ]
    );
    assert_eq!(out.pages[0].agent, Some(AgentRole::Primary));
    assert!(out.pages[0].verified);
    assert_eq!(out.pages[1].agent, Some(AgentRole::Secondary));
    assert!(!out.pages[1].verified);
    assert_eq!(secondary.calls(), ["p2"]);

    let page2_warnings: Vec<PipelineEvent> = sink
        .for_page(2)
        .into_iter()
        .filter(|e| e.severity == Severity::Warning)
        .collect();
    assert_eq!(page2_warnings.len(), 2, "{page2_warnings:?}");
    assert!(page2_warnings[0].message.contains("response wait"));
    assert!(page2_warnings[1].message.contains("503"));
    assert!(sink
        .for_page(1)
        .iter()
        .all(|e| e.severity == Severity::Info));

    let mut seen = primary.seen_paths.lock().unwrap().clone();
    seen.extend(secondary.seen_paths.lock().unwrap().iter().cloned());
    assert!(all_gone(&seen), "page images left behind");
    assert!(doc.paths.iter().all(|p| p.exists()), "source images must survive");
}

#[tokio::test]
async fn pages_are_processed_once_each_in_order() {
    let names = ["a", "b", "c", "d", "e"];
    let doc = Doc::new(&names);
    let primary = Scripted::new(
        "primary",
        names.iter().map(|n| (*n, ok(&[*n]))).collect(),
    );
    let secondary = Scripted::new("secondary", vec![]);

    let out = run(
        &doc,
        AgentSet::new(primary.clone(), secondary.clone()),
        Arc::new(CollectingSink::default()),
    )
    .await;

    assert_eq!(primary.calls(), names);
    assert!(secondary.calls().is_empty());
    let got: Vec<&str> = out.records.iter().map(|r| r["name"].as_str()).collect();
    assert_eq!(got, names);
    let nums: Vec<usize> = out.pages.iter().map(|p| p.page_num).collect();
    assert_eq!(nums, [1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn total_failure_leaves_neighbours_intact() {
    let doc = Doc::new(&["ok1", "bad", "ok3"]);
    let primary = Scripted::new("primary", vec![("ok1", ok(&["X"])), ("ok3", ok(&["Z"]))]);
    let secondary = Scripted::new("secondary", vec![]);
    let sink = Arc::new(CollectingSink::default());

    let out = run(&doc, AgentSet::new(primary, secondary.clone()), sink.clone()).await;

    assert_eq!(out.records.len(), 2);
    assert_eq!(secondary.calls(), ["bad"]);
    assert!(matches!(
        out.pages[1].error,
        Some(PageError::ExtractionFailed { page: 2, .. })
    ));
    assert_eq!(out.stats.failed_pages, 1);
    let errors: Vec<_> = sink
        .events()
        .into_iter()
        .filter(|e| e.severity == Severity::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].page, Some(2));
}

#[tokio::test]
async fn failing_verifier_equals_no_verifier() {
    let doc = Doc::new(&["p1", "p2"]);
    let script = || {
        Scripted::new(
            "primary",
            vec![("p1", ok(&["A", "B"])), ("p2", ok(&["C"]))],
        )
    };
    let secondary = Scripted::new("secondary", vec![]);
    let broken = Scripted::new("verifier", vec![]);

    let with = run(
        &doc,
        AgentSet::new(script(), secondary.clone()).with_verifier(broken),
        Arc::new(CollectingSink::default()),
    )
    .await;
    let without = run(
        &doc,
        AgentSet::new(script(), secondary),
        Arc::new(CollectingSink::default()),
    )
    .await;

    assert_eq!(with.records, without.records);
    assert_eq!(with.stats.verified_pages, 0);
}

#[tokio::test]
async fn unreadable_page_is_skipped() {
    let doc = Doc::new(&["p1", "p3"]);
    let mut paths = doc.paths.clone();
    paths.insert(1, doc.paths[0].with_file_name("missing.png"));
    let primary = Scripted::new("primary", vec![("p1", ok(&["A"])), ("p3", ok(&["C"]))]);
    let secondary = Scripted::new("secondary", vec![]);
    let sink = Arc::new(CollectingSink::default());

    let mut source = ImageFileSource::new(paths);
    let out = extract_with_agents(
        &mut source,
        AgentSet::new(primary, secondary),
        &config_with(sink.clone()),
        &CancellationFlag::new(),
    )
    .await;

    assert_eq!(out.records.len(), 2);
    assert!(matches!(
        out.pages[1].error,
        Some(PageError::RenderFailed { page: 2, .. })
    ));
    assert_eq!(sink.for_page(2)[0].severity, Severity::Error);
}

#[tokio::test]
async fn events_reach_a_channel_sink_in_order() {
    let doc = Doc::new(&["p1"]);
    let primary = Scripted::new("primary", vec![]);
    let secondary = Scripted::new("secondary", vec![("p1", ok(&["A"]))]);
    let (sink, mut rx) = ChannelSink::new();

    run(&doc, AgentSet::new(primary, secondary), Arc::new(sink)).await;

    let mut severities = Vec::new();
    while let Ok(event) = rx.try_recv() {
        severities.push((event.page, event.severity));
    }
    assert_eq!(
        severities,
        [
            (None, Severity::Info),
            (Some(1), Severity::Warning),
            (Some(1), Severity::Info),
            (None, Severity::Info),
        ]
    );
}

#[tokio::test]
async fn panicking_sink_does_not_stop_the_run() {
    struct Explodes;
    impl EventSink for Explodes {
        fn emit(&self, _event: &PipelineEvent) {
            panic!("sink down");
        }
    }

    let doc = Doc::new(&["p1", "p2"]);
    let primary = Scripted::new("primary", vec![("p1", ok(&["A"])), ("p2", ok(&["B"]))]);
    let secondary = Scripted::new("secondary", vec![]);

    let out = run(&doc, AgentSet::new(primary, secondary), Arc::new(Explodes)).await;
    assert_eq!(out.records.len(), 2);
}

#[tokio::test]
async fn cancellation_is_honoured_between_pages() {
    struct CancelOnFirst {
        flag: CancellationFlag,
    }

    #[async_trait]
    impl ExtractionAgent for CancelOnFirst {
        fn name(&self) -> &str {
            "cancel-on-first"
        }

        async fn extract(&self, _image: &PageImage) -> ExtractionResult {
            self.flag.cancel();
            Ok(vec![record([("name", "only")])])
        }
    }

    let doc = Doc::new(&["p1", "p2", "p3"]);
    let flag = CancellationFlag::new();
    let primary = Arc::new(CancelOnFirst { flag: flag.clone() });
    let secondary = Scripted::new("secondary", vec![]);

    let mut source = doc.source();
    let out = extract_with_agents(
        &mut source,
        AgentSet::new(primary, secondary),
        &config_with(Arc::new(CollectingSink::default())),
        &flag,
    )
    .await;

    assert!(out.cancelled);
    assert_eq!(out.pages.len(), 1, "the in-flight page completes, no more");
    assert_eq!(out.records.len(), 1);
}
