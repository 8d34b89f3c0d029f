use serde::Deserialize;
use std::path::PathBuf;

// =============================================================================
// Time-related constants
// =============================================================================

/// Delay between the last edit of a document and its virtual document pull (500ms)
pub const DEBOUNCE_DELAY_MS: u64 = 500;

/// Timeout for existence and version probes in milliseconds (5 seconds)
pub const PROBE_TIMEOUT_MS: u64 = 5_000;

/// Timeout for the server auto-install in milliseconds (5 minutes)
pub const INSTALL_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// Timeout for a single pull request in milliseconds (10 seconds)
pub const REQUEST_TIMEOUT_MS: u64 = 10_000;

// =============================================================================
// Server discovery constants
// =============================================================================

/// Environment variable that overrides the server command
pub const SERVER_ENV_VAR: &str = "MCLSP_PATH";

/// Bare server command looked up on PATH
pub const SERVER_COMMAND: &str = "mclsp";

/// Python module that runs the server (`python -m mclsp`)
pub const SERVER_MODULE: &str = "mclsp";

/// Package installed by pip when the module is missing
pub const SERVER_PACKAGE: &str = "mclsp";

/// Interpreter commands probed on PATH, in order
pub const INTERPRETER_CANDIDATES: &[&str] = &["python3", "python"];

/// Oldest supported Python 3 minor version
pub const DEFAULT_MIN_PYTHON_MINOR: u64 = 10;

/// Client configuration structure, as handed over by the editor settings
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    pub server: ServerConfig,
    pub flavor: Flavor,
    pub log_level: LogLevel,
    pub sync: SyncConfig,
}

/// Server discovery configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Explicit server command, used as-is when non-empty
    pub path: Option<String>,
    /// Explicit Python interpreter used for `python -m mclsp`
    pub python_path: Option<String>,
    /// Minimum accepted minor version of a Python 3 interpreter found on PATH
    pub min_python_minor: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            path: None,
            python_path: None,
            min_python_minor: DEFAULT_MIN_PYTHON_MINOR,
        }
    }
}

/// Document synchronization configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Debounce window for edits in milliseconds
    pub debounce_ms: u64,
    /// Timeout for virtual document pulls in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEBOUNCE_DELAY_MS,
            request_timeout_ms: REQUEST_TIMEOUT_MS,
        }
    }
}

/// Simulation flavor the server analyzes documents as
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    /// Let the server infer the flavor per document
    #[default]
    Auto,
    Mcstas,
    Mcxtrace,
}

impl Flavor {
    /// Value forwarded in `initializationOptions`, or None for `auto`
    pub fn as_init_option(&self) -> Option<&'static str> {
        match self {
            Flavor::Auto => None,
            Flavor::Mcstas => Some("mcstas"),
            Flavor::Mcxtrace => Some("mcxtrace"),
        }
    }
}

/// Log verbosity
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Returns the `EnvFilter` directive for this level
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Returns the path to the data directory for mclsp-client.
/// Uses $XDG_DATA_HOME/mclsp-client if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/mclsp-client,
/// or ./mclsp-client if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the persisted state database.
pub fn state_db_path() -> PathBuf {
    data_dir().join("state.db")
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("mclsp-client.log")
}

/// Reads the server command override from the environment.
pub fn server_env_override() -> Option<String> {
    std::env::var(SERVER_ENV_VAR).ok()
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("mclsp-client")
}
