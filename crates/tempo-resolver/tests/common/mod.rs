// Shared test utilities for integration tests
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempo_resolver::{
    AccountServices, HostConfig, PluginLocation, PluginSupervisor, ScriptAccount, ScriptChannel,
};

/// Channel that records every submission instead of evaluating it.
#[derive(Default)]
pub struct RecordingChannel {
    submitted: Mutex<Vec<String>>,
}

impl RecordingChannel {
    /// Remove and return everything submitted so far.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.submitted.lock())
    }

    pub fn len(&self) -> usize {
        self.submitted.lock().len()
    }
}

impl ScriptChannel for RecordingChannel {
    fn submit(&self, code: String) {
        self.submitted.lock().push(code);
    }
}

/// Supervisor that remembers which accounts it heard about.
#[derive(Default)]
pub struct SupervisorSpy {
    pub loaded: Mutex<Vec<String>>,
    pub unloaded: Mutex<Vec<String>>,
    /// Both notifications in arrival order.
    pub events: Mutex<Vec<&'static str>>,
}

impl PluginSupervisor for SupervisorSpy {
    fn on_plugin_loaded(&self, account: &ScriptAccount) {
        self.loaded.lock().push(account.name().to_string());
        self.events.lock().push("loaded");
    }

    fn on_plugin_unloaded(&self, account: &ScriptAccount) {
        self.unloaded.lock().push(account.name().to_string());
        self.events.lock().push("unloaded");
    }
}

pub fn metadata_json(plugin_name: &str) -> String {
    serde_json::json!({
        "pluginName": plugin_name,
        "name": "Dummy Resolver",
        "description": "Resolver used in tests",
        "type": "resolver",
        "version": "0.1.0",
        "author": "tests",
        "manifest": {
            "main": "dummy.js",
            "scripts": ["lib.js"],
            "icon": "icon.png"
        }
    })
    .to_string()
}

/// Create `<root>/<dir_name>/content/metadata.json` and return the plugin
/// directory.
pub fn write_plugin(root: &Path, dir_name: &str, plugin_name: &str) -> PathBuf {
    let plugin_dir = root.join(dir_name);
    let content = plugin_dir.join("content");
    std::fs::create_dir_all(&content).unwrap();
    std::fs::write(content.join("metadata.json"), metadata_json(plugin_name)).unwrap();
    plugin_dir
}

pub struct Harness {
    pub account: Arc<ScriptAccount>,
    pub channel: Arc<RecordingChannel>,
    pub supervisor: Arc<SupervisorSpy>,
    pub services: AccountServices,
    pub dir: tempfile::TempDir,
}

/// Services with in-memory stores on the current runtime.
pub fn test_services(supervisor: Arc<SupervisorSpy>) -> AccountServices {
    AccountServices::new(
        HostConfig::default(),
        supervisor,
        tokio::runtime::Handle::current(),
    )
}

/// Load an installed plugin named `dummy` from a fresh temp directory.
pub fn load_dummy() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let plugin_dir = write_plugin(dir.path(), "dummy", "dummy");
    let supervisor = Arc::new(SupervisorSpy::default());
    let services = test_services(supervisor.clone());
    let channel = Arc::new(RecordingChannel::default());

    let account =
        ScriptAccount::load(PluginLocation::installed(plugin_dir), channel.clone(), &services)
            .unwrap();

    Harness {
        account,
        channel,
        supervisor,
        services,
        dir,
    }
}

/// Request id of an `invoke(...)` submission.
pub fn invoked_request_id(code: &str) -> String {
    let rest = code
        .strip_prefix("Tomahawk.PluginManager.invoke('")
        .unwrap_or_else(|| panic!("not an invocation: {code}"));
    rest.split('\'').next().unwrap().to_string()
}
