//! Resolver metadata loading and validation.
//!
//! Every resolver ships a `content/metadata.json` describing the plugin and
//! the scripts the execution environment must load. The document is read
//! once when an account is created and is immutable afterwards.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ResolverError;

/// Name of the metadata document inside a plugin's content directory.
pub const METADATA_FILE: &str = "metadata.json";

/// URL prefix for plugins bundled with the application.
const BUNDLED_URL_PREFIX: &str = "file:///android_asset";

/// URL prefix for plugins installed by the user.
const INSTALLED_URL_PREFIX: &str = "file://";

/// Parsed `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverMetadata {
    /// Stable identifier used for config and cookie namespacing.
    pub plugin_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    /// Capabilities the plugin claims to provide (informational).
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub manifest: ScriptManifest,
}

/// The `manifest` section: which scripts make up the plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptManifest {
    /// Entry script, loaded last.
    pub main: String,
    /// Helper scripts loaded before `main`, in order.
    #[serde(default)]
    pub scripts: Vec<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub icon_white: Option<String>,
    #[serde(default)]
    pub icon_background: Option<String>,
}

/// Validate that a path is safe (no `..` components, not absolute).
fn validate_path_safety(path: &str, field_name: &str) -> Result<(), ResolverError> {
    if path.is_empty() {
        return Err(ResolverError::InvalidMetadata(format!(
            "{field_name} must not be empty"
        )));
    }
    let p = Path::new(path);
    if p.is_absolute() {
        return Err(ResolverError::InvalidMetadata(format!(
            "{field_name} must be a relative path, got absolute: '{path}'"
        )));
    }
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ResolverError::InvalidMetadata(format!(
            "{field_name} must not contain '..': '{path}'"
        )));
    }
    Ok(())
}

impl ResolverMetadata {
    /// Parse metadata from a JSON string.
    pub fn parse(json: &str) -> Result<Self, ResolverError> {
        serde_json::from_str(json).map_err(|e| ResolverError::Metadata(e.to_string()))
    }

    /// Validate required fields and script paths.
    pub fn validate(&self) -> Result<(), ResolverError> {
        if self.plugin_name.trim().is_empty() {
            return Err(ResolverError::InvalidMetadata(
                "pluginName must not be empty".into(),
            ));
        }
        validate_path_safety(&self.manifest.main, "manifest.main")?;
        for script in &self.manifest.scripts {
            validate_path_safety(script, "manifest.scripts")?;
        }
        Ok(())
    }

    /// Parse and validate metadata from a JSON string.
    pub fn parse_and_validate(json: &str) -> Result<Self, ResolverError> {
        let metadata = Self::parse(json)?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Read and validate `metadata.json` from a plugin's content directory.
    pub fn load(content_dir: &Path) -> Result<Self, ResolverError> {
        let path = content_dir.join(METADATA_FILE);
        let json = std::fs::read_to_string(&path).map_err(|e| {
            ResolverError::Metadata(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse_and_validate(&json)
    }

    /// Script paths relative to the content directory, in load order.
    pub fn script_paths(&self) -> impl Iterator<Item = &str> {
        self.manifest
            .scripts
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.manifest.main.as_str()))
    }
}

// ─── Plugin location ────────────────────────────────────────────────────

/// Where a plugin lives and how its scripts are addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginLocation {
    path: PathBuf,
    manually_installed: bool,
}

impl PluginLocation {
    /// A user-installed plugin: `path` is its directory on disk.
    pub fn installed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            manually_installed: true,
        }
    }

    /// A bundled plugin: `path` is relative to the assets root
    /// (e.g. `/js/resolvers/jamendo`).
    pub fn bundled(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            manually_installed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_manually_installed(&self) -> bool {
        self.manually_installed
    }

    /// Account name: the last segment of the plugin path.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Directory holding `metadata.json` and the plugin's scripts.
    pub fn content_dir(&self, assets_dir: &Path) -> PathBuf {
        if self.manually_installed {
            self.path.join("content")
        } else {
            let relative = self.path.strip_prefix("/").unwrap_or(&self.path);
            assets_dir.join(relative).join("content")
        }
    }

    /// Base URL under which the execution environment loads the scripts.
    pub fn base_url(&self) -> String {
        let prefix = if self.manually_installed {
            INSTALLED_URL_PREFIX
        } else {
            BUNDLED_URL_PREFIX
        };
        format!("{prefix}{}", self.path.display())
    }

    /// URLs of the plugin's scripts in load order.
    pub fn script_urls(&self, metadata: &ResolverMetadata) -> Vec<String> {
        let base = self.base_url();
        metadata
            .script_paths()
            .map(|script| format!("{base}/content/{script}"))
            .collect()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_METADATA: &str = r#"{
        "pluginName": "jamendo",
        "name": "Jamendo",
        "description": "Searches Jamendo for free music",
        "type": "resolver/javascript",
        "version": "0.9.1",
        "author": "Jane Doe",
        "website": "https://example.com",
        "capabilities": ["resolver"],
        "manifest": {
            "main": "jamendo.js",
            "scripts": ["lib/md5.js", "lib/util.js"],
            "icon": "icon.png",
            "iconWhite": "icon-white.png",
            "iconBackground": "bg.jpg"
        }
    }"#;

    const MINIMAL_METADATA: &str = r#"{
        "pluginName": "ab",
        "manifest": { "main": "main.js" }
    }"#;

    // ── Parsing ─────────────────────────────────────────────────────

    #[test]
    fn test_parse_full_metadata() {
        let meta = ResolverMetadata::parse_and_validate(FULL_METADATA).unwrap();
        assert_eq!(meta.plugin_name, "jamendo");
        assert_eq!(meta.name.as_deref(), Some("Jamendo"));
        assert_eq!(meta.kind.as_deref(), Some("resolver/javascript"));
        assert_eq!(meta.version.as_deref(), Some("0.9.1"));
        assert_eq!(meta.capabilities, vec!["resolver"]);
        assert_eq!(meta.manifest.main, "jamendo.js");
        assert_eq!(meta.manifest.scripts, vec!["lib/md5.js", "lib/util.js"]);
        assert_eq!(meta.manifest.icon_white.as_deref(), Some("icon-white.png"));
    }

    #[test]
    fn test_parse_minimal_metadata() {
        let meta = ResolverMetadata::parse_and_validate(MINIMAL_METADATA).unwrap();
        assert_eq!(meta.plugin_name, "ab");
        assert!(meta.name.is_none());
        assert!(meta.manifest.scripts.is_empty());
        assert!(meta.capabilities.is_empty());
    }

    #[test]
    fn test_parse_missing_manifest() {
        let err = ResolverMetadata::parse(r#"{"pluginName": "x"}"#).unwrap_err();
        assert!(matches!(err, ResolverError::Metadata(_)));
        assert!(err.to_string().contains("manifest"));
    }

    #[test]
    fn test_parse_garbage() {
        let err = ResolverMetadata::parse("not json").unwrap_err();
        assert!(matches!(err, ResolverError::Metadata(_)));
    }

    // ── Validation ──────────────────────────────────────────────────

    #[test]
    fn test_validate_empty_plugin_name() {
        let json = r#"{"pluginName": " ", "manifest": {"main": "m.js"}}"#;
        let err = ResolverMetadata::parse_and_validate(json).unwrap_err();
        assert!(matches!(err, ResolverError::InvalidMetadata(_)));
        assert!(err.to_string().contains("pluginName"));
    }

    #[test]
    fn test_validate_empty_main() {
        let json = r#"{"pluginName": "x", "manifest": {"main": ""}}"#;
        let err = ResolverMetadata::parse_and_validate(json).unwrap_err();
        assert!(err.to_string().contains("manifest.main must not be empty"));
    }

    #[test]
    fn test_validate_absolute_main() {
        let json = r#"{"pluginName": "x", "manifest": {"main": "/etc/passwd"}}"#;
        let err = ResolverMetadata::parse_and_validate(json).unwrap_err();
        assert!(err.to_string().contains("relative path"));
    }

    #[test]
    fn test_validate_parent_dir_script() {
        let json = r#"{"pluginName": "x", "manifest": {"main": "m.js", "scripts": ["../../x.js"]}}"#;
        let err = ResolverMetadata::parse_and_validate(json).unwrap_err();
        assert!(err.to_string().contains("'..'"));
    }

    #[test]
    fn test_script_paths_order() {
        let meta = ResolverMetadata::parse(FULL_METADATA).unwrap();
        let paths: Vec<_> = meta.script_paths().collect();
        assert_eq!(paths, vec!["lib/md5.js", "lib/util.js", "jamendo.js"]);
    }

    // ── Loading from disk ───────────────────────────────────────────

    #[test]
    fn test_load_from_content_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), FULL_METADATA).unwrap();
        let meta = ResolverMetadata::load(dir.path()).unwrap();
        assert_eq!(meta.plugin_name, "jamendo");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ResolverMetadata::load(dir.path()).unwrap_err();
        assert!(matches!(err, ResolverError::Metadata(_)));
        assert!(err.to_string().contains("failed to read"));
    }

    // ── Plugin location ─────────────────────────────────────────────

    #[test]
    fn test_installed_location() {
        let loc = PluginLocation::installed("/data/resolvers/spotify");
        assert!(loc.is_manually_installed());
        assert_eq!(loc.name(), "spotify");
        assert_eq!(
            loc.content_dir(Path::new("assets")),
            PathBuf::from("/data/resolvers/spotify/content")
        );
        assert_eq!(loc.base_url(), "file:///data/resolvers/spotify");
    }

    #[test]
    fn test_bundled_location() {
        let loc = PluginLocation::bundled("/js/resolvers/jamendo");
        assert!(!loc.is_manually_installed());
        assert_eq!(loc.name(), "jamendo");
        assert_eq!(
            loc.content_dir(Path::new("/opt/assets")),
            PathBuf::from("/opt/assets/js/resolvers/jamendo/content")
        );
        assert_eq!(loc.base_url(), "file:///android_asset/js/resolvers/jamendo");
    }

    #[test]
    fn test_script_urls() {
        let loc = PluginLocation::installed("/data/jamendo");
        let meta = ResolverMetadata::parse(FULL_METADATA).unwrap();
        let urls = loc.script_urls(&meta);
        assert_eq!(urls.len(), 3);
        assert_eq!(urls[0], "file:///data/jamendo/content/lib/md5.js");
        assert_eq!(urls[2], "file:///data/jamendo/content/jamendo.js");
    }
}
