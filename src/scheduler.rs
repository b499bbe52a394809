//! Delayed task scheduler.
//!
//! A task is a self-contained HTTP request (target, method, headers and body)
//! fired once after a delay. Tasks cannot be cancelled and are not persisted;
//! consumers of a fired task must check current state before acting on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Default upper bound for a fired request.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// An HTTP request to fire later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTask {
    /// Absolute `http`/`https` target URL.
    pub url: String,
    /// HTTP method, e.g. `POST`.
    pub method: String,
    /// Extra request headers.
    pub headers: HashMap<String, String>,
    /// Request body, sent as JSON.
    pub body: Vec<u8>,
}

impl PushTask {
    /// A `POST` of `body` serialized as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Serialization`] if `body` cannot be
    /// serialized.
    pub fn post_json<T: Serialize>(url: impl Into<String>, body: &T) -> Result<Self, SchedulerError> {
        Ok(Self {
            url: url.into(),
            method: "POST".to_owned(),
            headers: HashMap::new(),
            body: serde_json::to_vec(body)?,
        })
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Handle of an enqueued task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskHandle {
    /// Opaque task ID.
    pub id: String,
    /// Target URL.
    pub url: String,
    /// HTTP method.
    pub method: String,
    /// Earliest firing time.
    pub fire_at: DateTime<Utc>,
}

/// Errors from enqueuing a task. Firing errors are only logged.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The target URL is not an absolute http(s) URL.
    #[error("invalid task target {url:?}: {reason}")]
    InvalidTarget {
        /// Rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The HTTP method is not valid.
    #[error("invalid task method {0:?}")]
    InvalidMethod(String),

    /// A header name or value is not valid.
    #[error("invalid task header {0:?}")]
    InvalidHeader(String),

    /// The delay puts the firing time outside the representable range.
    #[error("task delay of {0:?} is out of range")]
    InvalidDelay(Duration),

    /// The task body could not be serialized.
    #[error("task serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Fires HTTP tasks after a delay.
#[async_trait]
pub trait TaskScheduler: Send + Sync {
    /// Schedule `task` to fire no earlier than `delay` from now.
    async fn enqueue(&self, task: PushTask, delay: Duration) -> Result<TaskHandle, SchedulerError>;
}

/// In-process scheduler backed by `tokio` timers and `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTaskScheduler {
    client: reqwest::Client,
    pending: Arc<Mutex<HashMap<String, TaskHandle>>>,
}

impl Default for HttpTaskScheduler {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

impl HttpTaskScheduler {
    /// Create a scheduler whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeout, using default");
                reqwest::Client::default()
            });
        Self {
            client,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Tasks that have not fired yet, earliest first.
    pub fn pending(&self) -> Vec<TaskHandle> {
        let mut handles: Vec<TaskHandle> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        handles.sort_by(|a, b| a.fire_at.cmp(&b.fire_at));
        handles
    }
}

#[async_trait]
impl TaskScheduler for HttpTaskScheduler {
    async fn enqueue(&self, task: PushTask, delay: Duration) -> Result<TaskHandle, SchedulerError> {
        let url = parse_target(&task.url)?;
        let method = Method::from_bytes(task.method.as_bytes())
            .map_err(|_| SchedulerError::InvalidMethod(task.method.clone()))?;
        let headers = build_headers(&task.headers)?;

        let fire_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|offset| Utc::now().checked_add_signed(offset))
            .ok_or(SchedulerError::InvalidDelay(delay))?;
        let handle = TaskHandle {
            id: Uuid::new_v4().to_string(),
            url: url.to_string(),
            method: method.to_string(),
            fire_at,
        };

        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.id.clone(), handle.clone());

        let client = self.client.clone();
        let pending = Arc::clone(&self.pending);
        let task_id = handle.id.clone();
        let body = task.body;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&task_id);

            let result = client
                .request(method, url.clone())
                .headers(headers)
                .body(body)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!(task_id = %task_id, url = %url, status = %resp.status(), "task fired");
                }
                Ok(resp) => {
                    warn!(
                        task_id = %task_id,
                        url = %url,
                        status = %resp.status(),
                        "task target returned non-success status"
                    );
                }
                Err(e) => {
                    warn!(task_id = %task_id, url = %url, error = %e, "task request failed");
                }
            }
        });

        info!(
            task_id = %handle.id,
            url = %handle.url,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "task enqueued"
        );
        Ok(handle)
    }
}

fn parse_target(raw: &str) -> Result<Url, SchedulerError> {
    let url = Url::parse(raw).map_err(|e| SchedulerError::InvalidTarget {
        url: raw.to_owned(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(SchedulerError::InvalidTarget {
            url: raw.to_owned(),
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}

fn build_headers(headers: &HashMap<String, String>) -> Result<HeaderMap, SchedulerError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| SchedulerError::InvalidHeader(name.clone()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| SchedulerError::InvalidHeader(name.to_string()))?;
        map.insert(name, value);
    }
    map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(map)
}
