//! Primary agent: a chat web UI driven through a remote browser session.
//!
//! The agent does not automate a browser itself. It talks to a session
//! through the [`UiConnector`] / [`UiSession`] seam, which keeps every step
//! (connect, login, upload, prompt, read) individually bounded and testable.
//! [`HttpUiConnector`] is the production implementation: a small JSON API
//! exposed by a UI automation gateway.
//!
//! ```text
//! POST   {endpoint}/sessions                → {"session_id": "…"}
//! POST   {endpoint}/sessions/{id}/login     {"email", "password"}
//! POST   {endpoint}/sessions/{id}/upload    {"filename", "mime_type", "data"}
//! POST   {endpoint}/sessions/{id}/prompt    {"text"}
//! GET    {endpoint}/sessions/{id}/response  → {"text": "…"}
//! DELETE {endpoint}/sessions/{id}
//! ```
//!
//! The session is closed on every path, including step failures and
//! timeouts, before `extract` returns. If the `extract` future itself is
//! dropped, the session is closed on a background task instead.

use super::{ExtractionAgent, ExtractionResult};
use crate::config::{AgentTimeouts, RemoteUiSettings};
use crate::error::{AgentError, RegisterError};
use crate::page::PageImage;
use crate::parser::parse_records;
use crate::record::RecordSchema;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// One live UI session. Dropped only through [`UiSession::close`].
#[async_trait]
pub trait UiSession: Send {
    async fn login(&mut self, email: &str, password: &str) -> Result<(), AgentError>;

    async fn upload(&mut self, image: &PageImage) -> Result<(), AgentError>;

    async fn submit_prompt(&mut self, prompt: &str) -> Result<(), AgentError>;

    /// Wait until the reply has rendered and return its text.
    async fn read_response(&mut self) -> Result<String, AgentError>;

    async fn close(self: Box<Self>) -> Result<(), AgentError>;
}

/// Opens fresh sessions. Each extraction gets its own.
#[async_trait]
pub trait UiConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn UiSession>, AgentError>;
}

/// The primary extraction agent.
pub struct RemoteUiAgent {
    connector: Arc<dyn UiConnector>,
    settings: RemoteUiSettings,
    schema: RecordSchema,
    prompt: String,
    timeouts: AgentTimeouts,
}

impl RemoteUiAgent {
    pub fn new(
        connector: Arc<dyn UiConnector>,
        settings: RemoteUiSettings,
        schema: RecordSchema,
        prompt: String,
        timeouts: AgentTimeouts,
    ) -> Self {
        Self {
            connector,
            settings,
            schema,
            prompt,
            timeouts,
        }
    }

    async fn drive(&self, session: &mut dyn UiSession, image: &PageImage) -> Result<String, AgentError> {
        let t = &self.timeouts;
        bounded(
            "login",
            t.login_secs,
            session.login(&self.settings.email, &self.settings.password),
        )
        .await?;
        bounded("upload", t.upload_secs, session.upload(image)).await?;
        bounded("prompt", t.response_secs, session.submit_prompt(&self.prompt)).await?;
        bounded("response wait", t.response_secs, session.read_response()).await
    }
}

#[async_trait]
impl ExtractionAgent for RemoteUiAgent {
    fn name(&self) -> &str {
        "remote-ui"
    }

    async fn extract(&self, image: &PageImage) -> ExtractionResult {
        let close_secs = self.timeouts.close_secs;
        let mut pending = PendingConnect::spawn(Arc::clone(&self.connector), close_secs);
        let mut guard = SessionGuard::new(pending.wait(self.timeouts.connect_secs).await?, close_secs);

        let outcome = match guard.session.as_deref_mut() {
            Some(session) => self.drive(session, image).await,
            None => Err(AgentError::session("session already closed")),
        };
        guard.close().await;

        let raw = outcome?;
        debug!("Remote UI returned {} chars", raw.len());
        let records = parse_records(&raw)?;
        Ok(self.schema.normalize_all(records))
    }
}

/// Run one session step under its own timeout.
async fn bounded<T>(
    operation: &str,
    secs: u64,
    step: impl Future<Output = Result<T, AgentError>>,
) -> Result<T, AgentError> {
    match timeout(Duration::from_secs(secs), step).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::timeout(operation, secs)),
    }
}

async fn close_session(session: Box<dyn UiSession>, close_secs: u64) {
    match timeout(Duration::from_secs(close_secs), session.close()).await {
        Ok(Ok(())) => debug!("Remote UI session closed"),
        Ok(Err(e)) => warn!("Remote UI session close failed: {}", e),
        Err(_) => warn!("Remote UI session close timed out after {}s", close_secs),
    }
}

/// Hand `task` to the runtime; used from `Drop`, where nothing can be awaited.
fn spawn_detached(task: impl Future<Output = ()> + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(_) => warn!("No async runtime left; remote UI session not closed"),
    }
}

/// A connect running on its own task.
///
/// If the caller stops waiting, whether through the connect timeout or by
/// being dropped, a session the gateway opens afterwards is still closed.
struct PendingConnect {
    handle: Option<JoinHandle<Result<Box<dyn UiSession>, AgentError>>>,
    close_secs: u64,
}

impl PendingConnect {
    fn spawn(connector: Arc<dyn UiConnector>, close_secs: u64) -> Self {
        let handle = tokio::spawn(async move { connector.connect().await });
        Self {
            handle: Some(handle),
            close_secs,
        }
    }

    async fn wait(&mut self, secs: u64) -> Result<Box<dyn UiSession>, AgentError> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(AgentError::session("connect already awaited"));
        };
        let joined = match timeout(Duration::from_secs(secs), handle).await {
            Ok(joined) => joined,
            Err(_) => return Err(AgentError::timeout("connect", secs)),
        };
        self.handle = None;
        joined.map_err(|e| AgentError::session(format!("connect task: {e}")))?
    }
}

impl Drop for PendingConnect {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let close_secs = self.close_secs;
            spawn_detached(async move {
                if let Ok(Ok(session)) = handle.await {
                    debug!("Closing remote UI session opened after connect was abandoned");
                    close_session(session, close_secs).await;
                }
            });
        }
    }
}

/// Owns an open session until it is closed.
///
/// [`SessionGuard::close`] is the normal path. Dropping the guard with the
/// session still open (the extract future was cancelled mid-step) closes it
/// on a spawned task.
struct SessionGuard {
    session: Option<Box<dyn UiSession>>,
    close_secs: u64,
}

impl SessionGuard {
    fn new(session: Box<dyn UiSession>, close_secs: u64) -> Self {
        Self {
            session: Some(session),
            close_secs,
        }
    }

    async fn close(mut self) {
        if let Some(session) = self.session.take() {
            close_session(session, self.close_secs).await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            warn!("Remote UI extraction abandoned mid-session; closing in background");
            spawn_detached(close_session(session, self.close_secs));
        }
    }
}

// ── HTTP gateway implementation ──────────────────────────────────────────

/// Opens sessions on a UI automation gateway over HTTP.
pub struct HttpUiConnector {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUiConnector {
    pub fn new(settings: RemoteUiSettings) -> Result<Self, RegisterError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("parivar-extract/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RegisterError::AgentNotConfigured {
                agent: "primary (remote UI)".to_string(),
                hint: format!("HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: settings.endpoint,
        })
    }
}

#[derive(Deserialize)]
struct SessionCreated {
    session_id: String,
}

#[derive(Deserialize)]
struct ResponseText {
    text: String,
}

#[async_trait]
impl UiConnector for HttpUiConnector {
    async fn connect(&self) -> Result<Box<dyn UiSession>, AgentError> {
        let resp = self
            .client
            .post(format!("{}/sessions", self.endpoint))
            .send()
            .await
            .map_err(|e| AgentError::session(format!("connect: {e}")))?;
        let created: SessionCreated = expect_success(resp, "connect")
            .await?
            .json()
            .await
            .map_err(|e| AgentError::session(format!("connect: bad reply: {e}")))?;
        debug!("Opened remote UI session {}", created.session_id);
        Ok(Box::new(HttpUiSession {
            client: self.client.clone(),
            base: format!("{}/sessions/{}", self.endpoint, created.session_id),
        }))
    }
}

struct HttpUiSession {
    client: reqwest::Client,
    base: String,
}

impl HttpUiSession {
    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response, AgentError> {
        let resp = self
            .client
            .post(format!("{}/{}", self.base, path))
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::session(format!("{path}: {e}")))?;
        expect_success(resp, path).await
    }
}

#[async_trait]
impl UiSession for HttpUiSession {
    async fn login(&mut self, email: &str, password: &str) -> Result<(), AgentError> {
        self.post("login", json!({ "email": email, "password": password }))
            .await
            .map(|_| ())
    }

    async fn upload(&mut self, image: &PageImage) -> Result<(), AgentError> {
        let bytes = image
            .read_bytes()
            .await
            .map_err(|e| AgentError::io(format!("reading page image: {e}")))?;
        let filename = image
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page.png".to_string());
        self.post(
            "upload",
            json!({
                "filename": filename,
                "mime_type": image.mime_type(),
                "data": STANDARD.encode(&bytes),
            }),
        )
        .await
        .map(|_| ())
    }

    async fn submit_prompt(&mut self, prompt: &str) -> Result<(), AgentError> {
        self.post("prompt", json!({ "text": prompt })).await.map(|_| ())
    }

    async fn read_response(&mut self) -> Result<String, AgentError> {
        let resp = self
            .client
            .get(format!("{}/response", self.base))
            .send()
            .await
            .map_err(|e| AgentError::session(format!("response: {e}")))?;
        let body: ResponseText = expect_success(resp, "response")
            .await?
            .json()
            .await
            .map_err(|e| AgentError::session(format!("response: bad reply: {e}")))?;
        Ok(body.text)
    }

    async fn close(self: Box<Self>) -> Result<(), AgentError> {
        let resp = self
            .client
            .delete(&self.base)
            .send()
            .await
            .map_err(|e| AgentError::session(format!("close: {e}")))?;
        expect_success(resp, "close").await.map(|_| ())
    }
}

async fn expect_success(resp: reqwest::Response, step: &str) -> Result<reqwest::Response, AgentError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(AgentError::session(format!("{step}: HTTP {status}: {body}")))
}
