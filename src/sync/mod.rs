//! Document synchronization layer
//!
//! Keeps the virtual document cache in step with the editor's source
//! documents.
//!
//! ```text
//! editor events ──▶ EventDispatcher ──▶ SyncScheduler ──pull──▶ RefreshChannel ──▶ Cache
//!                                                                    ▲
//!                                               server push ─────────┘
//! ```
//!
//! # Modules
//!
//! - [`events`]: Dispatch table of lifecycle events with scoped registrations
//! - [`refresh`]: Pull and push paths into the cache
//! - [`scheduler`]: Per-document debounce timers

pub mod events;
pub mod refresh;
pub mod scheduler;

pub use events::{DocumentEvent, EventDispatcher, LifecycleEvent, Priority, Registration};
pub use refresh::{RefreshChannel, SyncRequest, SyncTrigger, VirtualDocumentSource};
pub use scheduler::SyncScheduler;
