//! Local collections fed by collection resolver plugins.
//!
//! A collection plugin pushes its tracks into a named store through the
//! host's native services. Every mutation bumps the store's revision token,
//! which the plugin compares against its own copy to decide whether a full
//! re-sync is needed.

use thiserror::Error;

pub mod memory;
pub mod track;

pub use memory::MemoryCollectionStore;
pub use track::CollectionTrack;

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("invalid collection id: {0:?}")]
    InvalidId(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Storage backing plugin-fed collections, keyed by collection id.
///
/// Implementations must be safe to share between native threads: the
/// resolver host calls into the store inline from whatever thread delivers
/// the script's request.
pub trait CollectionStore: Send + Sync {
    /// Append tracks to the collection and return its new revision token.
    fn add_tracks(&self, id: &str, tracks: Vec<CollectionTrack>) -> Result<String, CollectionError>;

    /// Remove every track from the collection.
    fn wipe(&self, id: &str) -> Result<(), CollectionError>;

    /// Current revision token of the collection.
    fn revision(&self, id: &str) -> Result<String, CollectionError>;
}
