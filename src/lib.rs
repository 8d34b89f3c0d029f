pub mod config;
pub mod document;
pub mod error;
pub mod extension;
pub mod logging;
pub mod server;
pub mod session;
pub mod sync;
pub mod ui;
