//! Lifecycle event dispatch table
//!
//! Maps named document lifecycle events to handler functions. Registering a
//! handler returns a [`Registration`] guard; dropping the guard removes the
//! handler, so teardown is just dropping the guards.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use indexmap::IndexMap;
use tower_lsp::lsp_types::Url;
use tracing::debug;

/// Named document lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Opened,
    Changed,
    Closed,
}

/// Payload delivered with every lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEvent {
    pub uri: Url,
    /// Full document text (absent on close)
    pub text: Option<String>,
}

pub type Handler = Arc<dyn Fn(&DocumentEvent) + Send + Sync>;

/// Dispatch slot; every `First` handler runs before any `Normal` one
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    First,
    Normal,
}

struct Entry {
    event: LifecycleEvent,
    priority: Priority,
    handler: Handler,
}

#[derive(Default)]
struct Table {
    next_id: u64,
    // Within a priority, insertion order is dispatch order
    handlers: IndexMap<u64, Entry>,
}

fn lock(table: &Mutex<Table>) -> MutexGuard<'_, Table> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct EventDispatcher {
    table: Arc<Mutex<Table>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event in the normal slot
    pub fn register<F>(&self, event: LifecycleEvent, handler: F) -> Registration
    where
        F: Fn(&DocumentEvent) + Send + Sync + 'static,
    {
        self.register_with_priority(event, Priority::Normal, handler)
    }

    pub fn register_with_priority<F>(
        &self,
        event: LifecycleEvent,
        priority: Priority,
        handler: F,
    ) -> Registration
    where
        F: Fn(&DocumentEvent) + Send + Sync + 'static,
    {
        let mut table = lock(&self.table);
        let id = table.next_id;
        table.next_id += 1;
        table.handlers.insert(
            id,
            Entry {
                event,
                priority,
                handler: Arc::new(handler),
            },
        );
        debug!("Registered {:?} handler {} for {:?}", priority, id, event);

        Registration {
            id,
            table: Arc::downgrade(&self.table),
        }
    }

    /// Call every handler registered for `event`: `First` handlers, then
    /// `Normal` ones, each in registration order.
    ///
    /// Returns the number of handlers called.
    pub fn dispatch(&self, event: LifecycleEvent, payload: &DocumentEvent) -> usize {
        // Handlers run without the table lock so they may register or drop guards
        let mut handlers: Vec<(Priority, Handler)> = lock(&self.table)
            .handlers
            .values()
            .filter(|entry| entry.event == event)
            .map(|entry| (entry.priority, entry.handler.clone()))
            .collect();
        handlers.sort_by_key(|(priority, _)| *priority);

        for (_, handler) in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    /// Number of handlers currently registered for `event`
    pub fn handler_count(&self, event: LifecycleEvent) -> usize {
        lock(&self.table)
            .handlers
            .values()
            .filter(|entry| entry.event == event)
            .count()
    }
}

/// Scoped handler registration; deregisters on drop
#[must_use = "dropping a Registration removes the handler"]
pub struct Registration {
    id: u64,
    table: Weak<Mutex<Table>>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            lock(&table).handlers.shift_remove(&self.id);
            debug!("Deregistered handler {}", self.id);
        }
    }
}
