//! Host-wide configuration shared by every loaded account.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for resolver accounts and the native services they expose.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Root directory of plugins bundled with the application
    /// (default: `assets`).
    pub assets_dir: PathBuf,
    /// Timeout for a single `httpRequest` in seconds (default: 30).
    pub http_timeout_secs: u64,
    /// Redirects followed by `httpRequest` before giving up (default: 10).
    pub http_max_redirects: usize,
    /// Maximum response body size in bytes (default: 10 MB).
    pub http_max_response_bytes: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("assets"),
            http_timeout_secs: 30,
            http_max_redirects: 10,
            http_max_response_bytes: 10 * 1024 * 1024,
        }
    }
}

impl HostConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        Self {
            assets_dir: std::env::var("RESOLVER_ASSETS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("assets")),
            http_timeout_secs: std::env::var("RESOLVER_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            http_max_redirects: std::env::var("RESOLVER_HTTP_MAX_REDIRECTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            http_max_response_bytes: std::env::var("RESOLVER_HTTP_MAX_RESPONSE_MB")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(10)
                * 1024
                * 1024,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
