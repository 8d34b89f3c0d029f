use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tracing::debug;

use crate::document::key::VirtualKey;
use crate::document::types::VirtualDocument;

/// Content returned for keys that have no entry yet
pub const NOT_YET_AVAILABLE: &str =
    "/* Virtual C document not yet available. Open or edit the McCode source to generate it. */\n";

/// Capacity of the change event channel; slow subscribers see `Lagged`
const EVENT_CAPACITY: usize = 64;

/// Change notification emitted by the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Updated(VirtualKey),
    Removed(VirtualKey),
}

/// In-memory store of the latest virtual document per key.
///
/// Last write wins: `update` overwrites unconditionally, whichever update
/// channel produced the document. Reads never block on I/O and never fetch.
pub struct VirtualDocumentCache {
    entries: RwLock<HashMap<VirtualKey, VirtualDocument>>,
    events: broadcast::Sender<CacheEvent>,
}

impl Default for VirtualDocumentCache {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualDocumentCache {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
        }
    }

    // The map is only ever replaced wholesale per key, so a poisoned lock
    // still guards consistent data.
    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<VirtualKey, VirtualDocument>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<VirtualKey, VirtualDocument>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite the entry for the document's key and notify subscribers
    pub fn update(&self, document: VirtualDocument) {
        let key = document.key.clone();
        debug!(
            "Updating virtual document {} ({} bytes)",
            key,
            document.content.len()
        );
        self.write_entries().insert(key.clone(), document);
        // No subscribers is fine
        let _ = self.events.send(CacheEvent::Updated(key));
    }

    /// Delete the entry if present
    pub fn remove(&self, key: &VirtualKey) {
        if self.write_entries().remove(key).is_some() {
            debug!("Removed virtual document {}", key);
            let _ = self.events.send(CacheEvent::Removed(key.clone()));
        }
    }

    /// Cached content, or the "not yet available" placeholder
    pub fn read(&self, key: &VirtualKey) -> String {
        self.read_entries()
            .get(key)
            .map(|doc| doc.content.clone())
            .unwrap_or_else(|| NOT_YET_AVAILABLE.to_string())
    }

    /// The full cached document, if any
    pub fn get(&self, key: &VirtualKey) -> Option<VirtualDocument> {
        self.read_entries().get(key).cloned()
    }

    pub fn contains(&self, key: &VirtualKey) -> bool {
        self.read_entries().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }
}
