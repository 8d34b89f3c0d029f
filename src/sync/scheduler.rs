//! Debounced sync scheduling
//!
//! Turns the editor's open/change/close stream into a bounded-rate pull per
//! source document:
//! - open pulls immediately
//! - change (re)starts a per-document timer; only the last edit in the window pulls
//! - close cancels the timer and drops the cache entry

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tower_lsp::lsp_types::Url;
use tracing::debug;

use crate::document::key::VirtualKey;
use crate::sync::refresh::{RefreshChannel, SyncRequest, SyncTrigger};

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

type TimerMap = HashMap<Url, PendingTimer>;

fn lock(timers: &Mutex<TimerMap>) -> MutexGuard<'_, TimerMap> {
    timers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns at most one live debounce timer per source document
pub struct SyncScheduler {
    refresh: Arc<RefreshChannel>,
    delay: Duration,
    timers: Arc<Mutex<TimerMap>>,
    next_generation: AtomicU64,
}

impl SyncScheduler {
    pub fn new(refresh: Arc<RefreshChannel>, delay: Duration) -> Self {
        Self {
            refresh,
            delay,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Pull immediately, regardless of any pending timer
    pub fn did_open(&self, uri: Url, text: String) -> JoinHandle<()> {
        debug!("Document opened: {}", uri);
        let refresh = self.refresh.clone();
        let request = SyncRequest {
            uri,
            text: Some(text),
            trigger: SyncTrigger::Open,
        };
        tokio::spawn(async move { refresh.pull_in_background(request).await })
    }

    /// Cancel the pending timer for `uri` and start a new one
    pub fn did_change(&self, uri: Url, text: String) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        // Hold the lock across spawn + insert so the timer cannot observe the
        // map before its own entry is in it
        let mut timers = lock(&self.timers);
        if let Some(previous) = timers.remove(&uri) {
            debug!("Cancelling pending sync for {}", uri);
            previous.handle.abort();
        }

        let refresh = self.refresh.clone();
        let timers_ref = self.timers.clone();
        let delay = self.delay;
        let timer_uri = uri.clone();

        let handle = tokio::spawn(async move {
            sleep(delay).await;

            // Deregister before pulling: once issued, the pull is not cancelable
            {
                let mut timers = lock(&timers_ref);
                match timers.get(&timer_uri) {
                    Some(timer) if timer.generation == generation => {
                        timers.remove(&timer_uri);
                    }
                    _ => return,
                }
            }

            let request = SyncRequest {
                uri: timer_uri,
                text: Some(text),
                trigger: SyncTrigger::Change,
            };
            refresh.pull_in_background(request).await;
        });

        timers.insert(uri, PendingTimer { generation, handle });
    }

    /// Cancel the pending timer and remove the cache entry; no pull is issued
    pub fn did_close(&self, uri: &Url) {
        debug!("Document closed: {}", uri);
        if let Some(pending) = lock(&self.timers).remove(uri) {
            pending.handle.abort();
        }
        self.refresh.cache().remove(&VirtualKey::for_source(uri));
    }

    pub fn has_pending(&self, uri: &Url) -> bool {
        lock(&self.timers).contains_key(uri)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.timers).len()
    }

    /// Abort every pending timer
    pub fn cancel_all(&self) {
        for (_, pending) in lock(&self.timers).drain() {
            pending.handle.abort();
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
