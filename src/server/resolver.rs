//! Server command resolution
//!
//! A priority-ordered chain; the first satisfied branch wins:
//! 1. explicit configured command path (accepted as-is)
//! 2. `MCLSP_PATH` environment override (accepted as-is)
//! 3. bare `mclsp` on PATH (anything but "not found" counts as present)
//! 4. `python -m mclsp` through a discovered interpreter
//!
//! Resolution here only probes; it never prompts or installs. A missing
//! module comes back as [`Resolution::NeedsConsent`] for the caller to act on.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{SERVER_COMMAND, SERVER_MODULE, ServerConfig};
use crate::error::ResolveError;
use crate::server::interpreter::{
    CompanionInterpreter, Interpreter, InterpreterFinder, minimum_requirement,
};
use crate::server::probe::CommandRunner;

/// Which branch produced the server command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerOrigin {
    ExplicitPath,
    EnvVar,
    PathBinary,
    Interpreter,
}

/// A runnable server command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedServer {
    pub command: String,
    pub args: Vec<String>,
    pub origin: ServerOrigin,
}

impl ResolvedServer {
    /// `<interpreter> -m mclsp`
    pub fn interpreter(path: &str) -> Self {
        Self {
            command: path.to_string(),
            args: vec!["-m".to_string(), SERVER_MODULE.to_string()],
            origin: ServerOrigin::Interpreter,
        }
    }

    /// Command line for display
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Everything the chain reads, captured up front
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverInputs {
    pub server_path: Option<String>,
    pub env_override: Option<String>,
    pub python_path: Option<String>,
    pub min_python_minor: u64,
}

impl ResolverInputs {
    pub fn from_config(config: &ServerConfig, env_override: Option<String>) -> Self {
        Self {
            server_path: config.path.clone(),
            env_override,
            python_path: config.python_path.clone(),
            min_python_minor: config.min_python_minor,
        }
    }
}

/// Outcome of the discovery chain
#[derive(Debug)]
pub enum Resolution {
    Resolved(ResolvedServer),
    /// An interpreter was found but the server module is not installed
    NeedsConsent { interpreter: Interpreter },
    Failed(ResolveError),
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub struct ServerResolver {
    runner: Arc<dyn CommandRunner>,
    finder: InterpreterFinder,
    probe_timeout: Duration,
}

impl ServerResolver {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        companion: Arc<dyn CompanionInterpreter>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            finder: InterpreterFinder::new(runner.clone(), companion, probe_timeout),
            runner,
            probe_timeout,
        }
    }

    /// Run the chain
    pub async fn resolve(&self, inputs: &ResolverInputs) -> Resolution {
        if let Some(path) = non_empty(inputs.server_path.as_deref()) {
            info!("Using configured server command {}", path);
            return Resolution::Resolved(ResolvedServer {
                command: path.to_string(),
                args: Vec::new(),
                origin: ServerOrigin::ExplicitPath,
            });
        }

        if let Some(path) = non_empty(inputs.env_override.as_deref()) {
            info!("Using server command from environment: {}", path);
            return Resolution::Resolved(ResolvedServer {
                command: path.to_string(),
                args: Vec::new(),
                origin: ServerOrigin::EnvVar,
            });
        }

        let probe = self
            .runner
            .run(SERVER_COMMAND, &["--version".to_string()], self.probe_timeout)
            .await;
        if probe.is_present() {
            // A broken or wrong-version binary is still accepted
            info!("Found {} on PATH", SERVER_COMMAND);
            return Resolution::Resolved(ResolvedServer {
                command: SERVER_COMMAND.to_string(),
                args: Vec::new(),
                origin: ServerOrigin::PathBinary,
            });
        }
        debug!("{} not on PATH, looking for an interpreter", SERVER_COMMAND);

        let Some(interpreter) = self.find_interpreter(inputs).await else {
            let requirement = minimum_requirement(inputs.min_python_minor).to_string();
            warn!("No Python interpreter {} found", requirement);
            return Resolution::Failed(ResolveError::NoInterpreter { requirement });
        };

        if self.module_available(&interpreter.path).await {
            info!("{} -m {} is available", interpreter.path, SERVER_MODULE);
            Resolution::Resolved(ResolvedServer::interpreter(&interpreter.path))
        } else {
            info!(
                "{} is not installed for {}",
                SERVER_MODULE, interpreter.path
            );
            Resolution::NeedsConsent { interpreter }
        }
    }

    /// Interpreter discovery alone, as used by reinstall
    pub async fn find_interpreter(&self, inputs: &ResolverInputs) -> Option<Interpreter> {
        self.finder
            .find(inputs.python_path.as_deref(), inputs.min_python_minor)
            .await
    }

    /// Check whether `<interpreter> -m mclsp --version` runs
    pub async fn module_available(&self, interpreter: &str) -> bool {
        let args = vec![
            "-m".to_string(),
            SERVER_MODULE.to_string(),
            "--version".to_string(),
        ];
        self.runner
            .run(interpreter, &args, self.probe_timeout)
            .await
            .succeeded()
    }
}
