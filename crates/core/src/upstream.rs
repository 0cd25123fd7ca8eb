use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub if_none_match: Option<String>,
}

impl FetchOptions {
    pub fn conditional(etag: Option<&str>) -> Self {
        Self { if_none_match: etag.map(str::to_owned) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub etag: Option<String>,
}

impl UpstreamResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self { status: 200, body: body.into(), etag: None }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn not_modified(etag: Option<&str>) -> Self {
        Self { status: 304, body: Vec::new(), etag: etag.map(str::to_owned) }
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    pub fn json<T>(&self) -> Result<T, UpstreamError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body).map_err(|error| UpstreamError::Decode(error.to_string()))
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("upstream transport failed: {0}")]
    Transport(String),
    #[error("upstream request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("upstream responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("upstream response could not be decoded: {0}")]
    Decode(String),
}

impl UpstreamError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Single-host REST capability the bot core issues every outbound request through.
///
/// Implementations resolve `path` (which may carry a query string) against their own base URL
/// and may return any status code; [`fetch_with_timeout`] is the place where `>= 400` becomes an
/// error and where per-call deadlines are applied.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch(
        &self,
        path: &str,
        options: FetchOptions,
    ) -> Result<UpstreamResponse, UpstreamError>;
}

pub async fn fetch_with_timeout(
    client: &dyn UpstreamClient,
    path: &str,
    options: FetchOptions,
    timeout: Duration,
) -> Result<UpstreamResponse, UpstreamError> {
    match tokio::time::timeout(timeout, client.fetch(path, options)).await {
        Ok(result) => result.and_then(ensure_success),
        Err(_) => Err(UpstreamError::Timeout(timeout)),
    }
}

fn ensure_success(response: UpstreamResponse) -> Result<UpstreamResponse, UpstreamError> {
    if response.status >= 400 {
        return Err(UpstreamError::Status { status: response.status, body: response.body_text() });
    }
    Ok(response)
}

#[derive(Clone, Debug)]
struct ScriptedReply {
    delay: Duration,
    result: Result<UpstreamResponse, UpstreamError>,
}

/// In-memory upstream keyed by exact request path.
///
/// Each path holds a queue of replies; the last reply in a queue repeats forever. Unknown paths
/// answer 404.
#[derive(Default)]
pub struct InMemoryUpstream {
    replies: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    requests: Mutex<Vec<(String, FetchOptions)>>,
}

impl InMemoryUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, path: impl Into<String>, response: UpstreamResponse) -> Self {
        self.push(path.into(), Duration::ZERO, Ok(response));
        self
    }

    pub fn respond_after(
        self,
        path: impl Into<String>,
        delay: Duration,
        response: UpstreamResponse,
    ) -> Self {
        self.push(path.into(), delay, Ok(response));
        self
    }

    pub fn fail(self, path: impl Into<String>, error: UpstreamError) -> Self {
        self.push(path.into(), Duration::ZERO, Err(error));
        self
    }

    pub fn requests(&self) -> Vec<(String, FetchOptions)> {
        self.requests.lock().map(|requests| requests.clone()).unwrap_or_default()
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.requests().iter().filter(|(requested, _)| requested == path).count()
    }

    fn push(&self, path: String, delay: Duration, result: Result<UpstreamResponse, UpstreamError>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.entry(path).or_default().push_back(ScriptedReply { delay, result });
        }
    }

    fn next_reply(&self, path: &str) -> Option<ScriptedReply> {
        let mut replies = self.replies.lock().ok()?;
        let queue = replies.get_mut(path)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl UpstreamClient for InMemoryUpstream {
    async fn fetch(
        &self,
        path: &str,
        options: FetchOptions,
    ) -> Result<UpstreamResponse, UpstreamError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((path.to_owned(), options));
        }

        let Some(reply) = self.next_reply(path) else {
            return Ok(UpstreamResponse {
                status: 404,
                body: br#"{"error":"Not found"}"#.to_vec(),
                etag: None,
            });
        };

        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        reply.result
    }
}
