//! Tempo script resolver host
//!
//! Hosts JavaScript resolver plugins on the native side. Each plugin runs in
//! its own single-threaded script environment; this crate owns everything
//! around it: plugin metadata, the registry of capability objects the script
//! exposes, request/response correlation for calls into the script, and the
//! native services (collection storage, cookie-isolated HTTP) the script can
//! call back into.

pub mod account;
pub mod channel;
pub mod config;
pub mod error;
pub mod http;
pub mod job;
pub mod metadata;
pub mod native;
pub mod preferences;
pub mod registry;

pub use account::{AccountServices, AccountState, PluginSupervisor, ScriptAccount, ScriptMessage};
pub use channel::{QueuedChannel, ScriptChannel};
pub use config::HostConfig;
pub use error::ResolverError;
pub use http::{HttpContexts, HttpRequestOptions, ScriptHttpResponse};
pub use job::{JobOutcome, JobResult, JobTracker, ScriptJob};
pub use metadata::{PluginLocation, ResolverMetadata};
pub use native::{NativeMethod, NativeServices};
pub use preferences::{ConfigStore, JsonFileConfigStore, MemoryConfigStore, PluginConfig};
pub use registry::{CapabilityType, ObjectRegistry, ScriptObject};
