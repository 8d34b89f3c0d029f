//! Refresh channel for the virtual document cache
//!
//! Two independent paths write into the same cache:
//! - pull: client-initiated request to the server for a source document
//! - push: unsolicited notification the server sends after any rebuild
//!
//! Both end in the same unconditional `update`. There is no sequencing
//! between them; whichever result arrives last is what the cache holds.

use std::sync::{Arc, PoisonError, RwLock};

#[cfg(test)]
use mockall::automock;
use tower_lsp::lsp_types::Url;
use tracing::{debug, info, warn};

use crate::document::cache::VirtualDocumentCache;
use crate::document::types::{RefreshPayload, VirtualDocument};
use crate::error::{ConnectionError, RefreshError};

/// What caused a pull
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Open,
    Change,
    Command,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Open => "open",
            SyncTrigger::Change => "change",
            SyncTrigger::Command => "command",
        }
    }
}

/// A single pull; not persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub uri: Url,
    /// Current source text, so a server that has not parsed the document yet
    /// can still build it
    pub text: Option<String>,
    pub trigger: SyncTrigger,
}

/// Trait for requesting a virtual document from the server
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait VirtualDocumentSource: Send + Sync {
    /// Request the virtual document for `uri`
    ///
    /// # Returns
    /// * `Ok(Some(payload))` - The server answered with a refresh payload
    /// * `Ok(None)` - The server has no document for this URI
    /// * `Err(ConnectionError)` - Transport failure, timeout or server error
    async fn request_virtual_document(
        &self,
        uri: &Url,
        text: Option<String>,
    ) -> Result<Option<RefreshPayload>, ConnectionError>;
}

pub struct RefreshChannel {
    cache: Arc<VirtualDocumentCache>,
    source: RwLock<Option<Arc<dyn VirtualDocumentSource>>>,
}

impl RefreshChannel {
    pub fn new(cache: Arc<VirtualDocumentCache>) -> Self {
        Self {
            cache,
            source: RwLock::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<VirtualDocumentCache> {
        &self.cache
    }

    /// Route pulls to a live server session
    pub fn attach(&self, source: Arc<dyn VirtualDocumentSource>) {
        info!("Refresh channel attached to server session");
        *self.source.write().unwrap_or_else(PoisonError::into_inner) = Some(source);
    }

    /// Stop routing pulls; later pulls fail with `NotReady`
    pub fn detach(&self) {
        info!("Refresh channel detached from server session");
        *self.source.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_ready(&self) -> bool {
        self.source
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn current_source(&self) -> Option<Arc<dyn VirtualDocumentSource>> {
        self.source
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pull the virtual document and apply it to the cache.
    ///
    /// On any error the cache keeps its previous value.
    pub async fn pull(&self, request: SyncRequest) -> Result<VirtualDocument, RefreshError> {
        let source = self.current_source().ok_or(RefreshError::NotReady)?;

        debug!(
            "Pulling virtual document for {} (trigger: {})",
            request.uri,
            request.trigger.as_str()
        );

        let payload = source
            .request_virtual_document(&request.uri, request.text)
            .await?
            .ok_or_else(|| RefreshError::NoResult(request.uri.to_string()))?;

        let document = payload.into_document()?;
        self.cache.update(document.clone());
        Ok(document)
    }

    /// Pull for background callers: failures are logged and dropped
    pub async fn pull_in_background(&self, request: SyncRequest) {
        let uri = request.uri.clone();
        match self.pull(request).await {
            Ok(document) => debug!("Refreshed {} from {}", document.key, uri),
            Err(RefreshError::NotReady) => {
                debug!("Skipping pull for {}: server session not ready", uri)
            }
            Err(e) => warn!("Failed to refresh virtual document for {}: {}", uri, e),
        }
    }

    /// Apply a server push to the cache
    pub fn apply_push(&self, payload: RefreshPayload) {
        match payload.into_document() {
            Ok(document) => {
                debug!("Applying pushed virtual document {}", document.key);
                self.cache.update(document);
            }
            Err(e) => warn!("Ignoring virtual document push: {}", e),
        }
    }
}
