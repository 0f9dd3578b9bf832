//! Native→script invocations awaiting exactly one asynchronous result.
//!
//! Starting a job stores its completion callback under a fresh request id
//! and submits the invocation to the script side. The script answers later
//! with a message carrying that id; [`JobTracker::complete`] removes the
//! record and fires the callback. Each record can be removed once, so a
//! callback runs at most once no matter how many answers arrive.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::channel::{invoke_code, sanitize_log_text, ScriptChannel};
use crate::error::ResolverError;

/// Failure message used when the script reports an error without a usable
/// message.
pub const FALLBACK_ERROR_MESSAGE: &str = "no error message provided";

/// Result delivered to a job's completion callback.
pub type JobOutcome = Result<Value, String>;

type CompletionFn = Box<dyn FnOnce(JobOutcome) + Send>;

/// An invocation of `method` on a script object.
pub struct ScriptJob {
    object_id: String,
    method: String,
    arguments: Value,
    on_complete: CompletionFn,
}

impl std::fmt::Debug for ScriptJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptJob")
            .field("object_id", &self.object_id)
            .field("method", &self.method)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

impl ScriptJob {
    /// Create a job with empty arguments.
    pub fn new(
        object_id: impl Into<String>,
        method: impl Into<String>,
        on_complete: impl FnOnce(JobOutcome) + Send + 'static,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            method: method.into(),
            arguments: Value::Object(Default::default()),
            on_complete: Box::new(on_complete),
        }
    }

    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn arguments(&self) -> &Value {
        &self.arguments
    }
}

// ─── Inbound results ────────────────────────────────────────────────────

/// A job result reported by the script side.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub request_id: String,
    pub outcome: JobOutcome,
}

/// String form of a JSON primitive; `None` for null, arrays and objects.
fn primitive_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

impl JobResult {
    /// Decode `{requestId, data}` / `{requestId, error}` messages.
    ///
    /// Only a missing or empty `requestId` is an error. A present but
    /// non-primitive `error`, or a message with neither `data` nor `error`,
    /// is a failure with [`FALLBACK_ERROR_MESSAGE`].
    pub fn from_message(message: &Value) -> Result<Self, ResolverError> {
        let request_id = message
            .get("requestId")
            .and_then(primitive_string)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ResolverError::MalformedMessage("requestId is missing or empty".into())
            })?;

        let outcome = match (message.get("error"), message.get("data")) {
            (Some(error), _) => {
                Err(primitive_string(error).unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string()))
            }
            (None, Some(data)) => Ok(data.clone()),
            (None, None) => Err(FALLBACK_ERROR_MESSAGE.to_string()),
        };

        Ok(Self {
            request_id,
            outcome,
        })
    }
}

// ─── Tracker ────────────────────────────────────────────────────────────

struct PendingJob {
    object_id: String,
    method: String,
    on_complete: CompletionFn,
}

#[derive(Default)]
struct Inner {
    pending: HashMap<String, PendingJob>,
    /// Set once the owning account is torn down; no new jobs are accepted.
    closed: bool,
}

/// Correlation table for one account's in-flight jobs.
pub struct JobTracker {
    account: String,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for JobTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("JobTracker")
            .field("account", &self.account)
            .field("pending", &inner.pending.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

impl JobTracker {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Store `job` under a fresh process-unique request id and submit its
    /// invocation. Returns the request id.
    pub fn start(&self, job: ScriptJob, channel: &dyn ScriptChannel) -> Result<String, ResolverError> {
        let request_id = Uuid::new_v4().to_string();
        let code = invoke_code(&request_id, &job.object_id, &job.method, &job.arguments);

        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(ResolverError::Unloaded(self.account.clone()));
            }
            inner.pending.insert(
                request_id.clone(),
                PendingJob {
                    object_id: job.object_id,
                    method: job.method,
                    on_complete: job.on_complete,
                },
            );
        }

        // Submitted after the insert so an immediate answer finds the record.
        channel.submit(code);
        tracing::debug!(account = %self.account, request_id = %request_id, "job started");
        Ok(request_id)
    }

    /// Deliver a result. Returns `false` when no pending job matched.
    pub fn complete(&self, result: JobResult) -> bool {
        let job = self.inner.lock().pending.remove(&result.request_id);

        let Some(job) = job else {
            tracing::warn!(
                account = %self.account,
                request_id = %sanitize_log_text(&result.request_id),
                "no pending job for request id, dropping result"
            );
            return false;
        };

        tracing::debug!(
            account = %self.account,
            request_id = %result.request_id,
            object = %job.object_id,
            method = %job.method,
            success = result.outcome.is_ok(),
            "job completed"
        );
        // Lock released: the callback may start further jobs.
        (job.on_complete)(result.outcome);
        true
    }

    /// Stop accepting jobs and drop every pending one without running its
    /// callback. Returns the number of jobs discarded.
    pub fn discard_all(&self) -> usize {
        let discarded = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            std::mem::take(&mut inner.pending)
        };
        let count = discarded.len();
        drop(discarded);
        count
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.inner.lock().pending.contains_key(request_id)
    }
}
