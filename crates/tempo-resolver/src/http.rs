//! HTTP access for plugin scripts.
//!
//! Each plugin gets a cookie context keyed by its name, plus a separate one
//! used while the user is testing a configuration. A context is a
//! `reqwest::Client` with its own cookie jar, created on first use and shared
//! by every later request in that context.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::channel::sanitize_log_text;
use crate::config::HostConfig;
use crate::error::ResolverError;

/// Suffix of the cookie context used while testing a configuration.
const TEST_CONFIG_SUFFIX: &str = "_testConfig";

/// Cookie context id for a plugin.
pub fn cookie_context_id(plugin_name: &str, is_testing_config: bool) -> String {
    if is_testing_config {
        format!("{plugin_name}{TEST_CONFIG_SUFFIX}")
    } else {
        plugin_name.to_string()
    }
}

/// Replace every `%` with `%25`.
///
/// Text handed back to the script is percent-decoded once on the way in, so
/// it must be escaped here to arrive unchanged.
pub fn escape_percent(input: &str) -> String {
    input.replace('%', "%25")
}

// ─── Wire types ─────────────────────────────────────────────────────────

/// Parameters of a script's `httpRequest` call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpRequestOptions {
    pub url: String,
    #[serde(deserialize_with = "lenient_headers")]
    pub headers: Option<HashMap<String, String>>,
    /// Defaults to `GET`.
    pub method: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Raw request body.
    pub data: Option<String>,
    pub is_testing_config: bool,
}

/// Header values in their string form. Scripts routinely pass numbers and
/// booleans; `null` drops the header and arrays or objects are sent as JSON.
fn lenient_headers<'de, D>(deserializer: D) -> Result<Option<HashMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(headers) = Option::<HashMap<String, Value>>::deserialize(deserializer)? else {
        return Ok(None);
    };
    Ok(Some(
        headers
            .into_iter()
            .filter_map(|(name, value)| {
                let value = match value {
                    Value::Null => return None,
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    other => other.to_string(),
                };
                Some((name, value))
            })
            .collect(),
    ))
}

/// Response handed back to the script. Every text field is
/// [percent-escaped](escape_percent).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptHttpResponse {
    pub response_text: String,
    /// Lowercased header name to value; repeated headers are joined with `\n`.
    pub response_headers: BTreeMap<String, String>,
    pub status: u16,
    pub status_text: String,
}

// ─── Client pool ────────────────────────────────────────────────────────

/// Cookie-isolated HTTP clients, one per cookie context.
pub struct HttpContexts {
    timeout: Duration,
    max_redirects: usize,
    max_response_bytes: usize,
    clients: RwLock<HashMap<String, reqwest::Client>>,
}

impl std::fmt::Debug for HttpContexts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpContexts")
            .field("timeout", &self.timeout)
            .field("max_redirects", &self.max_redirects)
            .field("max_response_bytes", &self.max_response_bytes)
            .field("contexts", &self.clients.read().len())
            .finish()
    }
}

impl HttpContexts {
    pub fn new(config: &HostConfig) -> Self {
        Self {
            timeout: config.http_timeout(),
            max_redirects: config.http_max_redirects,
            max_response_bytes: config.http_max_response_bytes,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Client for `context`, created with an empty cookie jar on first use.
    pub fn client(&self, context: &str) -> Result<reqwest::Client, ResolverError> {
        if let Some(client) = self.clients.read().get(context) {
            return Ok(client.clone());
        }

        let mut clients = self.clients.write();
        // Another caller may have created it between the two locks.
        if let Some(client) = clients.get(context) {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::limited(self.max_redirects))
            .cookie_provider(Arc::new(reqwest::cookie::Jar::default()))
            .build()?;
        clients.insert(context.to_string(), client.clone());
        tracing::debug!(context = %context, "created HTTP cookie context");
        Ok(client)
    }

    pub fn context_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Perform a script's request in the cookie context of `plugin_name`.
    ///
    /// Any transport failure, including an oversized body, is an error.
    /// HTTP error statuses are not.
    pub async fn execute(
        &self,
        plugin_name: &str,
        options: HttpRequestOptions,
    ) -> Result<ScriptHttpResponse, ResolverError> {
        if options.url.trim().is_empty() {
            return Err(ResolverError::InvalidParams {
                method: "httpRequest".into(),
                reason: "url is empty".into(),
            });
        }

        let method = match options.method.as_deref() {
            None | Some("") => reqwest::Method::GET,
            Some(m) => reqwest::Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(
                |_| ResolverError::InvalidParams {
                    method: "httpRequest".into(),
                    reason: format!("invalid HTTP method: {m}"),
                },
            )?,
        };

        let context = cookie_context_id(plugin_name, options.is_testing_config);
        let client = self.client(&context)?;

        let mut request = client.request(method.clone(), &options.url);
        for (name, value) in options.headers.iter().flatten() {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(username) = options.username {
            request = request.basic_auth(username, options.password);
        }
        if let Some(data) = options.data {
            request = request.body(data);
        }

        tracing::debug!(
            plugin = %plugin_name,
            method = %method,
            url = %sanitize_log_text(&options.url),
            "script HTTP request"
        );
        let response = request.send().await?;
        self.read_response(response).await
    }

    async fn read_response(
        &self,
        mut response: reqwest::Response,
    ) -> Result<ScriptHttpResponse, ResolverError> {
        let status = response.status();

        let headers = response.headers();
        let mut response_headers = BTreeMap::new();
        for name in headers.keys() {
            let joined = headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join("\n");
            response_headers.insert(
                escape_percent(&name.as_str().to_ascii_lowercase()),
                escape_percent(&joined),
            );
        }

        if let Some(length) = response.content_length() {
            if length as usize > self.max_response_bytes {
                return Err(self.too_large(length as usize));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > self.max_response_bytes {
                return Err(self.too_large(body.len() + chunk.len()));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(ScriptHttpResponse {
            response_text: escape_percent(&String::from_utf8_lossy(&body)),
            response_headers,
            status: status.as_u16(),
            status_text: escape_percent(status.canonical_reason().unwrap_or("")),
        })
    }

    fn too_large(&self, size: usize) -> ResolverError {
        ResolverError::Http(format!(
            "response body too large: {size} bytes (max: {} bytes)",
            self.max_response_bytes
        ))
    }
}
