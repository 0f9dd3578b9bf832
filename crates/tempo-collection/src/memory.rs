//! In-memory collection store.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;

use crate::{CollectionError, CollectionStore, CollectionTrack};

#[derive(Debug, Default)]
struct Collection {
    tracks: Vec<CollectionTrack>,
    /// Milliseconds since the epoch of the last mutation, 0 if never mutated.
    revision: i64,
}

impl Collection {
    fn bump_revision(&mut self) {
        // Strictly increasing even when two mutations land in the same millisecond.
        self.revision = Utc::now().timestamp_millis().max(self.revision + 1);
    }
}

/// Collection store kept entirely in memory.
///
/// Revision tokens are millisecond timestamps of the last mutation rendered
/// as strings; a collection that was never touched reports `"0"`.
#[derive(Debug, Default)]
pub struct MemoryCollectionStore {
    collections: RwLock<HashMap<String, Collection>>,
}

fn check_id(id: &str) -> Result<(), CollectionError> {
    if id.trim().is_empty() {
        return Err(CollectionError::InvalidId(id.to_string()));
    }
    Ok(())
}

impl MemoryCollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the tracks currently stored under `id`.
    pub fn tracks(&self, id: &str) -> Vec<CollectionTrack> {
        self.collections
            .read()
            .get(id)
            .map(|c| c.tracks.clone())
            .unwrap_or_default()
    }

    /// Number of tracks stored under `id`.
    pub fn track_count(&self, id: &str) -> usize {
        self.collections.read().get(id).map_or(0, |c| c.tracks.len())
    }
}

impl CollectionStore for MemoryCollectionStore {
    fn add_tracks(&self, id: &str, tracks: Vec<CollectionTrack>) -> Result<String, CollectionError> {
        check_id(id)?;
        let mut collections = self.collections.write();
        let collection = collections.entry(id.to_string()).or_default();
        let added = tracks.len();
        collection.tracks.extend(tracks);
        collection.bump_revision();
        tracing::debug!(
            collection = ?id,
            added,
            total = collection.tracks.len(),
            revision = collection.revision,
            "tracks added to collection"
        );
        Ok(collection.revision.to_string())
    }

    fn wipe(&self, id: &str) -> Result<(), CollectionError> {
        check_id(id)?;
        let mut collections = self.collections.write();
        let collection = collections.entry(id.to_string()).or_default();
        collection.tracks.clear();
        collection.bump_revision();
        tracing::debug!(collection = ?id, "collection wiped");
        Ok(())
    }

    fn revision(&self, id: &str) -> Result<String, CollectionError> {
        check_id(id)?;
        Ok(self
            .collections
            .read()
            .get(id)
            .map_or(0, |c| c.revision)
            .to_string())
    }
}
