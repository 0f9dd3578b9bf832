//! Native services callable from plugin scripts.
//!
//! A script calls the host with a script-issued request id, a method name
//! and JSON params. Every call gets exactly one reply through
//! `reportNativeScriptJobResult`, with or without a value. Collection calls
//! are answered inline; `httpRequest` runs on the tokio runtime and replies
//! when the response is in.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tempo_collection::{CollectionStore, CollectionTrack};
use tokio::runtime::Handle;

use crate::channel::{native_result_code, sanitize_log_text, ScriptChannel};
use crate::error::ResolverError;
use crate::http::{HttpContexts, HttpRequestOptions};

/// Methods a script may call on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeMethod {
    CollectionAddTracks,
    CollectionWipe,
    CollectionRevision,
    /// Sent by a collection plugin after it has initialized. Wipes the
    /// collection, so the plugin re-syncs from scratch.
    CollectionInitialized,
    HttpRequest,
}

impl NativeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            NativeMethod::CollectionAddTracks => "collectionAddTracks",
            NativeMethod::CollectionWipe => "collectionWipe",
            NativeMethod::CollectionRevision => "collectionRevision",
            NativeMethod::CollectionInitialized => "collectionInitialized",
            NativeMethod::HttpRequest => "httpRequest",
        }
    }
}

impl fmt::Display for NativeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NativeMethod {
    type Err = ResolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collectionAddTracks" => Ok(NativeMethod::CollectionAddTracks),
            "collectionWipe" => Ok(NativeMethod::CollectionWipe),
            "collectionRevision" => Ok(NativeMethod::CollectionRevision),
            "collectionInitialized" => Ok(NativeMethod::CollectionInitialized),
            "httpRequest" => Ok(NativeMethod::HttpRequest),
            other => Err(ResolverError::UnknownNativeMethod(other.to_string())),
        }
    }
}

fn invalid_params(method: NativeMethod, reason: impl Into<String>) -> ResolverError {
    ResolverError::InvalidParams {
        method: method.to_string(),
        reason: reason.into(),
    }
}

/// The `id` param of a collection call. Numbers and booleans are accepted
/// in their string form.
fn collection_id(method: NativeMethod, params: &Value) -> Result<String, ResolverError> {
    match params.get("id") {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        _ => Err(invalid_params(method, "missing field `id`")),
    }
}

// ─── Dispatcher ─────────────────────────────────────────────────────────

/// Native service dispatcher for one account.
pub struct NativeServices {
    plugin_name: String,
    channel: Arc<dyn ScriptChannel>,
    collections: Arc<dyn CollectionStore>,
    http: Arc<HttpContexts>,
    runtime: Handle,
    open: AtomicBool,
}

impl fmt::Debug for NativeServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeServices")
            .field("plugin_name", &self.plugin_name)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl NativeServices {
    pub fn new(
        plugin_name: impl Into<String>,
        channel: Arc<dyn ScriptChannel>,
        collections: Arc<dyn CollectionStore>,
        http: Arc<HttpContexts>,
        runtime: Handle,
    ) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            channel,
            collections,
            http,
            runtime,
            open: AtomicBool::new(true),
        }
    }

    /// Stop replying. Calls still in flight finish without a reply.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Handle one native call. Produces exactly one reply. Once the
    /// services are closed the call is neither executed nor answered.
    pub fn dispatch(self: &Arc<Self>, request_id: u64, method: &str, params: &str) {
        if !self.is_open() {
            tracing::debug!(
                plugin = %self.plugin_name,
                request_id,
                method = %sanitize_log_text(method),
                "account unloaded, ignoring native call"
            );
            return;
        }

        let method = match method.parse::<NativeMethod>() {
            Ok(method) => method,
            Err(e) => {
                tracing::warn!(
                    plugin = %self.plugin_name,
                    request_id,
                    error = %sanitize_log_text(&e.to_string()),
                    "rejecting native call"
                );
                self.reply(request_id, None);
                return;
            }
        };

        let params: Value = match serde_json::from_str(params) {
            Ok(params) => params,
            Err(e) => {
                tracing::warn!(
                    plugin = %self.plugin_name,
                    request_id,
                    method = %method,
                    error = %sanitize_log_text(&e.to_string()),
                    "native call params are not valid JSON"
                );
                self.reply(request_id, None);
                return;
            }
        };

        tracing::debug!(plugin = %self.plugin_name, request_id, method = %method, "native call");

        if method == NativeMethod::HttpRequest {
            self.spawn_http_request(request_id, params);
            return;
        }

        let result = match self.handle_collection(method, &params) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(
                    plugin = %self.plugin_name,
                    request_id,
                    method = %method,
                    error = %sanitize_log_text(&e.to_string()),
                    "native call failed"
                );
                None
            }
        };
        self.reply(request_id, result);
    }

    fn handle_collection(
        &self,
        method: NativeMethod,
        params: &Value,
    ) -> Result<Option<Value>, ResolverError> {
        let id = collection_id(method, params)?;
        match method {
            NativeMethod::CollectionAddTracks => {
                let tracks = params
                    .get("tracks")
                    .cloned()
                    .ok_or_else(|| invalid_params(method, "missing field `tracks`"))?;
                let tracks: Vec<CollectionTrack> = serde_json::from_value(tracks)
                    .map_err(|e| invalid_params(method, e.to_string()))?;
                let count = tracks.len();
                let revision = self.collections.add_tracks(&id, tracks)?;
                tracing::info!(
                    plugin = %self.plugin_name,
                    collection = %sanitize_log_text(&id),
                    count,
                    revision = %revision,
                    "added tracks to collection"
                );
                Ok(Some(Value::String(revision)))
            }
            NativeMethod::CollectionWipe | NativeMethod::CollectionInitialized => {
                self.collections.wipe(&id)?;
                tracing::info!(
                    plugin = %self.plugin_name,
                    collection = %sanitize_log_text(&id),
                    method = %method,
                    "wiped collection"
                );
                Ok(None)
            }
            NativeMethod::CollectionRevision => {
                Ok(Some(Value::String(self.collections.revision(&id)?)))
            }
            NativeMethod::HttpRequest => Err(invalid_params(method, "not a collection method")),
        }
    }

    fn spawn_http_request(self: &Arc<Self>, request_id: u64, params: Value) {
        let options: HttpRequestOptions = match serde_json::from_value(params) {
            Ok(options) => options,
            Err(e) => {
                tracing::warn!(
                    plugin = %self.plugin_name,
                    request_id,
                    error = %sanitize_log_text(&e.to_string()),
                    "invalid httpRequest options"
                );
                self.reply(request_id, None);
                return;
            }
        };

        let this = Arc::clone(self);
        self.runtime.spawn(async move {
            let result = match this.http.execute(&this.plugin_name, options).await {
                Ok(response) => match serde_json::to_value(response) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::error!(plugin = %this.plugin_name, request_id, error = %e, "failed to encode HTTP response");
                        None
                    }
                },
                Err(e) => {
                    tracing::error!(
                        plugin = %this.plugin_name,
                        request_id,
                        error = %sanitize_log_text(&e.to_string()),
                        "httpRequest failed"
                    );
                    None
                }
            };
            this.reply(request_id, result);
        });
    }

    fn reply(&self, request_id: u64, result: Option<Value>) {
        if !self.is_open() {
            tracing::debug!(plugin = %self.plugin_name, request_id, "account unloaded, dropping native reply");
            return;
        }
        self.channel
            .submit(native_result_code(request_id, result.as_ref()));
    }
}
