//! A loaded resolver plugin and everything it owns.
//!
//! The account reads the plugin's metadata, then waits for the script
//! environment to report readiness before registering the plugin's resolver
//! capability. From then on it routes traffic in both directions: jobs go out
//! through the [`ScriptChannel`], and every inbound [`ScriptMessage`] passes
//! through [`ScriptAccount::on_message`].

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, ReentrantMutex};
use serde_json::Value;
use tempo_collection::{CollectionStore, MemoryCollectionStore};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::channel::{register_code, sanitize_log_text, ScriptChannel};
use crate::config::HostConfig;
use crate::error::ResolverError;
use crate::http::HttpContexts;
use crate::job::{JobResult, JobTracker, ScriptJob};
use crate::metadata::{PluginLocation, ResolverMetadata};
use crate::native::NativeServices;
use crate::preferences::{
    read_plugin_config, write_plugin_config, ConfigStore, MemoryConfigStore, PluginConfig,
};
use crate::registry::{CapabilityType, ObjectRegistry};

/// Config key holding the user's enable toggle.
pub const ENABLED_KEY: &str = "_enabled_";

// ─── Collaborators ──────────────────────────────────────────────────────

/// Receives account lifecycle notifications.
pub trait PluginSupervisor: Send + Sync {
    /// The account's script environment is ready and its resolver
    /// capability has been requested.
    fn on_plugin_loaded(&self, account: &ScriptAccount);

    fn on_plugin_unloaded(&self, _account: &ScriptAccount) {}
}

/// Host-wide services shared by every account.
#[derive(Clone)]
pub struct AccountServices {
    pub config: HostConfig,
    pub collections: Arc<dyn CollectionStore>,
    pub preferences: Arc<dyn ConfigStore>,
    pub http: Arc<HttpContexts>,
    pub supervisor: Arc<dyn PluginSupervisor>,
    pub runtime: Handle,
}

impl AccountServices {
    /// Services with in-memory collection and config stores.
    pub fn new(config: HostConfig, supervisor: Arc<dyn PluginSupervisor>, runtime: Handle) -> Self {
        let http = Arc::new(HttpContexts::new(&config));
        Self {
            config,
            collections: Arc::new(MemoryCollectionStore::new()),
            preferences: Arc::new(MemoryConfigStore::new()),
            http,
            supervisor,
            runtime,
        }
    }

    pub fn with_collections(mut self, collections: Arc<dyn CollectionStore>) -> Self {
        self.collections = collections;
        self
    }

    pub fn with_preferences(mut self, preferences: Arc<dyn ConfigStore>) -> Self {
        self.preferences = preferences;
        self
    }
}

// ─── Messages and state ─────────────────────────────────────────────────

/// Everything the script environment can send to its account.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptMessage {
    /// The environment has loaded the plugin's scripts.
    Ready,
    /// Result of a job, as `{requestId, data}` or `{requestId, error}`.
    JobResult(Value),
    RegisterPlugin {
        capability: String,
        object_id: String,
    },
    UnregisterPlugin {
        capability: String,
        object_id: String,
    },
    NativeCall {
        request_id: u64,
        method: String,
        params: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    Loading,
    Ready,
    Unloaded,
}

// ─── Account ────────────────────────────────────────────────────────────

pub struct ScriptAccount {
    name: String,
    location: PluginLocation,
    metadata: ResolverMetadata,
    channel: Arc<dyn ScriptChannel>,
    state: Mutex<AccountState>,
    /// Held across readiness and unload so supervisor notifications never
    /// reorder. Reentrant: a supervisor may unload from its callback.
    lifecycle: ReentrantMutex<()>,
    jobs: JobTracker,
    objects: ObjectRegistry,
    native: Arc<NativeServices>,
    preferences: Arc<dyn ConfigStore>,
    supervisor: Arc<dyn PluginSupervisor>,
}

impl fmt::Debug for ScriptAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptAccount")
            .field("name", &self.name)
            .field("plugin_name", &self.metadata.plugin_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ScriptAccount {
    /// Read the plugin's metadata and create its account in the `Loading`
    /// state. The caller is expected to start the script environment behind
    /// `channel` and feed its messages to [`on_message`](Self::on_message).
    pub fn load(
        location: PluginLocation,
        channel: Arc<dyn ScriptChannel>,
        services: &AccountServices,
    ) -> Result<Arc<Self>, ResolverError> {
        let name = location.name();
        let content_dir = location.content_dir(&services.config.assets_dir);
        let metadata = ResolverMetadata::load(&content_dir).map_err(|e| {
            tracing::error!(account = %name, path = %content_dir.display(), error = %e, "failed to load plugin metadata");
            e
        })?;

        let native = Arc::new(NativeServices::new(
            metadata.plugin_name.clone(),
            channel.clone(),
            services.collections.clone(),
            services.http.clone(),
            services.runtime.clone(),
        ));

        tracing::info!(
            account = %name,
            plugin = %metadata.plugin_name,
            version = metadata.version.as_deref().unwrap_or("unknown"),
            manually_installed = location.is_manually_installed(),
            "loaded plugin metadata"
        );

        Ok(Arc::new(Self {
            jobs: JobTracker::new(name.clone()),
            objects: ObjectRegistry::new(name.clone()),
            name,
            location,
            metadata,
            channel,
            state: Mutex::new(AccountState::Loading),
            lifecycle: ReentrantMutex::new(()),
            native,
            preferences: services.preferences.clone(),
            supervisor: services.supervisor.clone(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugin_name(&self) -> &str {
        &self.metadata.plugin_name
    }

    pub fn metadata(&self) -> &ResolverMetadata {
        &self.metadata
    }

    pub fn location(&self) -> &PluginLocation {
        &self.location
    }

    /// URLs of the scripts the environment must load, in order.
    pub fn script_urls(&self) -> Vec<String> {
        self.location.script_urls(&self.metadata)
    }

    pub fn state(&self) -> AccountState {
        *self.state.lock()
    }

    pub fn objects(&self) -> &ObjectRegistry {
        &self.objects
    }

    pub fn pending_jobs(&self) -> usize {
        self.jobs.pending_count()
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Entry point for every message from the script environment. Errors
    /// are logged here and never reach the script.
    pub fn on_message(&self, message: ScriptMessage) {
        match message {
            ScriptMessage::Ready => self.on_ready(),
            ScriptMessage::JobResult(result) => self.report_script_job_result(&result),
            ScriptMessage::RegisterPlugin {
                capability,
                object_id,
            } => {
                if let Err(e) = self.register_script_plugin(&capability, &object_id) {
                    tracing::warn!(account = %self.name, error = %sanitize_log_text(&e.to_string()), "ignoring plugin registration");
                }
            }
            ScriptMessage::UnregisterPlugin {
                capability,
                object_id,
            } => {
                if let Err(e) = self.unregister_script_plugin(&capability, &object_id) {
                    tracing::warn!(account = %self.name, error = %sanitize_log_text(&e.to_string()), "ignoring plugin unregistration");
                }
            }
            ScriptMessage::NativeCall {
                request_id,
                method,
                params,
            } => self.invoke_native_service(request_id, &method, &params),
        }
    }

    /// Handle the environment's readiness signal: request registration of
    /// the resolver capability and notify the supervisor.
    pub fn on_ready(&self) {
        let _lifecycle = self.lifecycle.lock();
        {
            let mut state = self.state.lock();
            match *state {
                AccountState::Loading => *state = AccountState::Ready,
                AccountState::Ready => {
                    tracing::warn!(account = %self.name, "duplicate readiness signal, ignoring");
                    return;
                }
                AccountState::Unloaded => {
                    tracing::warn!(account = %self.name, "readiness signal after unload, ignoring");
                    return;
                }
            }
        }

        tracing::info!(account = %self.name, "script environment ready");
        self.channel
            .submit(register_code(CapabilityType::Resolver.as_str()));
        self.supervisor.on_plugin_loaded(self);
    }

    /// Record `object_id` under `capability`. Returns `true` when the
    /// registration is new.
    pub fn register_script_plugin(
        &self,
        capability: &str,
        object_id: &str,
    ) -> Result<bool, ResolverError> {
        let _state = self.ensure_loaded()?;
        let capability: CapabilityType = capability.parse()?;
        let added = self.objects.register_capability(capability, object_id)?;
        if added {
            tracing::info!(account = %self.name, capability = %capability, object = %sanitize_log_text(object_id), "registered script plugin");
        }
        Ok(added)
    }

    /// Drop `object_id` from `capability`. Returns `true` when it was
    /// registered there.
    pub fn unregister_script_plugin(
        &self,
        capability: &str,
        object_id: &str,
    ) -> Result<bool, ResolverError> {
        let _state = self.ensure_loaded()?;
        let capability: CapabilityType = capability.parse()?;
        let removed = self.objects.unregister_capability(capability, object_id)?;
        if removed {
            tracing::info!(account = %self.name, capability = %capability, object = %sanitize_log_text(object_id), "unregistered script plugin");
        }
        Ok(removed)
    }

    /// Deliver a job result. Unknown, consumed and malformed results are
    /// logged and dropped.
    pub fn report_script_job_result(&self, message: &Value) {
        match JobResult::from_message(message) {
            Ok(result) => {
                self.jobs.complete(result);
            }
            Err(e) => {
                tracing::warn!(account = %self.name, error = %sanitize_log_text(&e.to_string()), "dropping job result");
            }
        }
    }

    /// Handle a native service call from the script.
    pub fn invoke_native_service(&self, request_id: u64, method: &str, params: &str) {
        self.native.dispatch(request_id, method, params);
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Start a job and return its request id.
    pub fn start_job(&self, job: ScriptJob) -> Result<String, ResolverError> {
        let _state = self.ensure_loaded()?;
        self.jobs.start(job, self.channel.as_ref())
    }

    /// Invoke `method` on a script object and wait for its result.
    ///
    /// A script-reported failure is [`ResolverError::JobFailed`]; unloading
    /// the account while the job is pending yields
    /// [`ResolverError::JobAbandoned`].
    pub async fn invoke(
        &self,
        object_id: &str,
        method: &str,
        arguments: Value,
    ) -> Result<Value, ResolverError> {
        let (tx, rx) = oneshot::channel();
        let job = ScriptJob::new(object_id, method, move |outcome| {
            // The caller may have stopped waiting.
            let _ = tx.send(outcome);
        })
        .with_arguments(arguments);

        let request_id = self.start_job(job)?;
        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(ResolverError::JobFailed(message)),
            Err(_) => Err(ResolverError::JobAbandoned(request_id)),
        }
    }

    // ── Config ──────────────────────────────────────────────────────

    /// The plugin's stored config, or an empty object.
    pub fn config(&self) -> PluginConfig {
        read_plugin_config(self.preferences.as_ref(), &self.metadata.plugin_name)
    }

    /// Persist `config` and ask the plugin's resolver to reload it.
    pub fn set_config(&self, config: &PluginConfig) -> Result<(), ResolverError> {
        write_plugin_config(self.preferences.as_ref(), &self.metadata.plugin_name, config)?;
        tracing::info!(account = %self.name, "saved plugin config");

        if self.state() == AccountState::Unloaded {
            return Ok(());
        }
        let Some(resolver) = self.objects.objects_of(CapabilityType::Resolver).into_iter().next()
        else {
            tracing::debug!(account = %self.name, "no resolver registered, skipping saveUserConfig");
            return Ok(());
        };

        let account = self.name.clone();
        let job = ScriptJob::new(resolver.id(), "saveUserConfig", move |outcome| {
            if let Err(message) = outcome {
                tracing::warn!(account = %account, error = %sanitize_log_text(&message), "saveUserConfig failed");
            }
        });
        self.start_job(job)?;
        Ok(())
    }

    pub fn enabled(&self) -> bool {
        self.config()
            .get(ENABLED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Persist the enable toggle. The plugin is not asked to reload.
    pub fn set_enabled(&self, enabled: bool) -> Result<(), ResolverError> {
        let mut config = self.config();
        config.insert(ENABLED_KEY.to_string(), Value::Bool(enabled));
        write_plugin_config(self.preferences.as_ref(), &self.metadata.plugin_name, &config)?;
        tracing::info!(account = %self.name, enabled, "changed plugin enabled state");
        Ok(())
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Unregister every capability, discard pending jobs and stop replying
    /// to native calls. Returns `false` if the account was already unloaded.
    pub fn unload(&self) -> bool {
        let _lifecycle = self.lifecycle.lock();
        {
            let mut state = self.state.lock();
            if *state == AccountState::Unloaded {
                return false;
            }
            *state = AccountState::Unloaded;
        }

        let unregistered = self.objects.unregister_all(self.channel.as_ref());
        let discarded = self.jobs.discard_all();
        self.native.close();

        tracing::info!(
            account = %self.name,
            unregistered,
            discarded_jobs = discarded,
            "unloaded plugin"
        );
        self.supervisor.on_plugin_unloaded(self);
        true
    }

    /// Fails once the account is unloaded. Hold the returned guard for the
    /// rest of the operation so `unload` cannot interleave with it.
    fn ensure_loaded(&self) -> Result<MutexGuard<'_, AccountState>, ResolverError> {
        let state = self.state.lock();
        if *state == AccountState::Unloaded {
            return Err(ResolverError::Unloaded(self.name.clone()));
        }
        Ok(state)
    }
}
