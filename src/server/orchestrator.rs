//! Interactive side of server resolution
//!
//! Consent prompts, install progress and error notifications all live here so
//! that [`ServerResolver`] stays free of user interaction.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{INSTALL_TIMEOUT_MS, PROBE_TIMEOUT_MS, SERVER_PACKAGE};
use crate::error::ResolveError;
use crate::server::install::Installer;
use crate::server::interpreter::{
    ActiveEnvironment, Interpreter, InterpreterSource, minimum_requirement,
};
use crate::server::probe::{CommandRunner, ProcessRunner};
use crate::server::resolver::{
    Resolution, ResolvedServer, ResolverInputs, ServerOrigin, ServerResolver,
};
use crate::server::state::{INTERPRETER_PATH_KEY, StateStorer};
use crate::ui::{ErrorAction, UserInterface};

/// Result of a successful reinstall
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReinstallOutcome {
    pub server: ResolvedServer,
    /// The user asked for the session to be restarted
    pub reload: bool,
}

pub struct ServerBootstrap {
    resolver: ServerResolver,
    installer: Installer,
    state: Arc<dyn StateStorer>,
    ui: Arc<dyn UserInterface>,
}

impl ServerBootstrap {
    pub fn new(
        resolver: ServerResolver,
        installer: Installer,
        state: Arc<dyn StateStorer>,
        ui: Arc<dyn UserInterface>,
    ) -> Self {
        Self {
            resolver,
            installer,
            state,
            ui,
        }
    }

    /// Bootstrap that runs real processes with the default timeouts
    pub fn with_process_runner(state: Arc<dyn StateStorer>, ui: Arc<dyn UserInterface>) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
        let resolver = ServerResolver::new(
            runner.clone(),
            Arc::new(ActiveEnvironment),
            Duration::from_millis(PROBE_TIMEOUT_MS),
        );
        let installer = Installer::new(
            runner,
            Duration::from_millis(INSTALL_TIMEOUT_MS),
            SERVER_PACKAGE,
        );
        Self::new(resolver, installer, state, ui)
    }

    /// Resolve the server command, prompting and installing as needed.
    /// Returns None when no server can be started; the user has been told why.
    pub async fn resolve(&self, inputs: &ResolverInputs) -> Option<ResolvedServer> {
        match self.resolver.resolve(inputs).await {
            Resolution::Resolved(server) => {
                if server.origin == ServerOrigin::Interpreter {
                    self.remember_interpreter(&server.command);
                }
                Some(server)
            }
            Resolution::Failed(e) => {
                self.ui
                    .show_error(&e.to_string(), Some(ErrorAction::OpenSettings))
                    .await;
                None
            }
            Resolution::NeedsConsent { interpreter } => {
                let accepted = self
                    .ui
                    .confirm_install(&interpreter.path, self.installer.package())
                    .await;
                if !accepted {
                    info!("Server installation declined");
                    return None;
                }
                match self.install_with(&interpreter).await {
                    Ok(server) => Some(server),
                    Err(e) => {
                        self.ui.show_error(&e.to_string(), None).await;
                        None
                    }
                }
            }
        }
    }

    /// Re-run only the install step against the persisted or a freshly
    /// discovered interpreter
    pub async fn reinstall(&self, inputs: &ResolverInputs) -> Result<ReinstallOutcome, ResolveError> {
        let interpreter = match self.persisted_interpreter() {
            Some(interpreter) => interpreter,
            None => self.resolver.find_interpreter(inputs).await.ok_or_else(|| {
                ResolveError::NoInterpreter {
                    requirement: minimum_requirement(inputs.min_python_minor).to_string(),
                }
            })?,
        };

        let server = self.install_with(&interpreter).await?;
        let reload = self.ui.confirm_reload().await;
        Ok(ReinstallOutcome { server, reload })
    }

    fn persisted_interpreter(&self) -> Option<Interpreter> {
        match self.state.get(INTERPRETER_PATH_KEY) {
            Ok(Some(path)) if !path.trim().is_empty() => Some(Interpreter {
                path,
                version: None,
                source: InterpreterSource::Persisted,
            }),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to read persisted interpreter: {}", e);
                None
            }
        }
    }

    async fn install_with(&self, interpreter: &Interpreter) -> Result<ResolvedServer, ResolveError> {
        self.ui
            .show_progress(&format!(
                "Installing {} with {}...",
                self.installer.package(),
                interpreter.path
            ))
            .await;
        self.installer.install(&interpreter.path).await?;

        self.remember_interpreter(&interpreter.path);
        Ok(ResolvedServer::interpreter(&interpreter.path))
    }

    /// Persist the interpreter for later reinstalls; failure only loses that shortcut
    fn remember_interpreter(&self, path: &str) {
        if let Err(e) = self.state.set(INTERPRETER_PATH_KEY, path) {
            warn!("Failed to persist interpreter path: {}", e);
        }
    }
}
