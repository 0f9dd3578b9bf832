//! Which objects a plugin exposes, and as what.
//!
//! The script side issues object identifiers and announces them under one
//! of the closed set of capability types. Each account keeps its own
//! registry; nothing here is shared between plugins.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::{unregister_code, ScriptChannel};
use crate::error::ResolverError;

// ─── Capability types ───────────────────────────────────────────────────

/// Roles a script object can fulfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CapabilityType {
    Resolver,
    Collection,
    InfoPlugin,
}

impl CapabilityType {
    pub const ALL: [CapabilityType; 3] = [
        CapabilityType::Resolver,
        CapabilityType::Collection,
        CapabilityType::InfoPlugin,
    ];

    /// Name used by the script-side plugin manager.
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityType::Resolver => "resolver",
            CapabilityType::Collection => "collection",
            CapabilityType::InfoPlugin => "infoPlugin",
        }
    }
}

impl fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityType {
    type Err = ResolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resolver" => Ok(CapabilityType::Resolver),
            "collection" => Ok(CapabilityType::Collection),
            "infoPlugin" => Ok(CapabilityType::InfoPlugin),
            other => Err(ResolverError::UnknownCapability(other.to_string())),
        }
    }
}

// ─── Script objects ─────────────────────────────────────────────────────

/// Host-side handle for an object living in a plugin's script context.
#[derive(Debug, PartialEq, Eq)]
pub struct ScriptObject {
    id: String,
    account: String,
}

impl ScriptObject {
    pub fn new(id: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            account: account.into(),
        }
    }

    /// Identifier issued by the script side.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the account owning this object.
    pub fn account(&self) -> &str {
        &self.account
    }
}

// ─── Registry ───────────────────────────────────────────────────────────

/// Objects currently active under one capability type, ordered by id.
type CapabilitySet = BTreeMap<String, Arc<ScriptObject>>;

#[derive(Debug, Default)]
struct Inner {
    /// Every object id ever announced, whether or not it is still active.
    objects: HashMap<String, Arc<ScriptObject>>,
    resolvers: CapabilitySet,
    collections: CapabilitySet,
    info_plugins: CapabilitySet,
}

impl Inner {
    fn set(&self, capability: CapabilityType) -> &CapabilitySet {
        match capability {
            CapabilityType::Resolver => &self.resolvers,
            CapabilityType::Collection => &self.collections,
            CapabilityType::InfoPlugin => &self.info_plugins,
        }
    }

    fn set_mut(&mut self, capability: CapabilityType) -> &mut CapabilitySet {
        match capability {
            CapabilityType::Resolver => &mut self.resolvers,
            CapabilityType::Collection => &mut self.collections,
            CapabilityType::InfoPlugin => &mut self.info_plugins,
        }
    }

    fn register_or_get(&mut self, object_id: &str, account: &str) -> Arc<ScriptObject> {
        self.objects
            .entry(object_id.to_string())
            .or_insert_with(|| Arc::new(ScriptObject::new(object_id, account)))
            .clone()
    }
}

/// Per-account registry of script objects and their active capabilities.
#[derive(Debug)]
pub struct ObjectRegistry {
    account: String,
    inner: Mutex<Inner>,
}

impl ObjectRegistry {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Return the handle for `object_id`, creating it on first sight.
    pub fn register_or_get_object(&self, object_id: &str) -> Arc<ScriptObject> {
        self.inner.lock().register_or_get(object_id, &self.account)
    }

    /// Look up a known object without creating it.
    pub fn object(&self, object_id: &str) -> Option<Arc<ScriptObject>> {
        self.inner.lock().objects.get(object_id).cloned()
    }

    /// Activate `object_id` under `capability`.
    ///
    /// Returns `Ok(true)` for a new registration and `Ok(false)` when the
    /// object was already active under the same type. An object active under
    /// a different type is rejected.
    pub fn register_capability(
        &self,
        capability: CapabilityType,
        object_id: &str,
    ) -> Result<bool, ResolverError> {
        let mut inner = self.inner.lock();

        if let Some(existing) = CapabilityType::ALL
            .into_iter()
            .filter(|other| *other != capability)
            .find(|other| inner.set(*other).contains_key(object_id))
        {
            return Err(ResolverError::CapabilityConflict {
                object_id: object_id.to_string(),
                existing: existing.to_string(),
            });
        }

        let object = inner.register_or_get(object_id, &self.account);
        let set = inner.set_mut(capability);
        if set.contains_key(object_id) {
            return Ok(false);
        }
        set.insert(object_id.to_string(), object);
        Ok(true)
    }

    /// Deactivate `object_id` under `capability`.
    ///
    /// The object must have been announced before; its handle stays known
    /// after deactivation. Returns whether an active registration was removed.
    pub fn unregister_capability(
        &self,
        capability: CapabilityType,
        object_id: &str,
    ) -> Result<bool, ResolverError> {
        let mut inner = self.inner.lock();
        if !inner.objects.contains_key(object_id) {
            return Err(ResolverError::UnknownObject(object_id.to_string()));
        }
        Ok(inner.set_mut(capability).remove(object_id).is_some())
    }

    /// Whether `object_id` is active under `capability`.
    pub fn is_registered(&self, capability: CapabilityType, object_id: &str) -> bool {
        self.inner.lock().set(capability).contains_key(object_id)
    }

    /// Active objects under `capability`, ordered by id.
    pub fn objects_of(&self, capability: CapabilityType) -> Vec<Arc<ScriptObject>> {
        self.inner.lock().set(capability).values().cloned().collect()
    }

    /// Number of active registrations across all capability types.
    pub fn active_count(&self) -> usize {
        let inner = self.inner.lock();
        CapabilityType::ALL
            .into_iter()
            .map(|c| inner.set(c).len())
            .sum()
    }

    /// Ask the script side to unregister every active object and forget all
    /// active registrations. Returns the number of notifications submitted.
    pub fn unregister_all(&self, channel: &dyn ScriptChannel) -> usize {
        let active: Vec<(CapabilityType, String)> = {
            let mut inner = self.inner.lock();
            CapabilityType::ALL
                .into_iter()
                .flat_map(|c| {
                    std::mem::take(inner.set_mut(c))
                        .into_keys()
                        .map(move |id| (c, id))
                })
                .collect()
        };

        for (capability, object_id) in &active {
            channel.submit(unregister_code(capability.as_str(), object_id));
        }
        active.len()
    }
}
