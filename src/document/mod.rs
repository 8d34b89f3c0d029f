//! Virtual document layer
//!
//! A virtual document is the C translation of a McCode source file, produced
//! by the server and addressed by a synthetic `mc-virtual://` key.
//!
//! # Modules
//!
//! - [`key`]: Deterministic virtual key derivation from source URIs
//! - [`types`]: `VirtualDocument`, region descriptors and the refresh payload
//! - [`cache`]: In-memory store of the latest content per key, with change events
//! - [`mapping`]: Source/virtual position mapping over region descriptors

pub mod cache;
pub mod key;
pub mod mapping;
pub mod types;

pub use cache::{CacheEvent, NOT_YET_AVAILABLE, VirtualDocumentCache};
pub use key::{VirtualKey, is_mccode_document};
pub use types::{PayloadError, RefreshPayload, Region, VirtualDocument};
