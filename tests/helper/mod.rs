pub mod fake_server;
pub mod ui;
