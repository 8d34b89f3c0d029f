//! Language server discovery and installation
//!
//! # Modules
//!
//! - [`probe`]: Running external commands with a timeout
//! - [`interpreter`]: Python interpreter discovery with a version floor
//! - [`resolver`]: The pure discovery chain, returning a tagged [`Resolution`]
//! - [`install`]: `pip install` of the server package
//! - [`state`]: SQLite-backed persistence of the chosen interpreter
//! - [`orchestrator`]: Consent prompts, progress and error reporting around the chain

pub mod install;
pub mod interpreter;
pub mod orchestrator;
pub mod probe;
pub mod resolver;
pub mod state;

pub use install::Installer;
pub use interpreter::{ActiveEnvironment, CompanionInterpreter, Interpreter, InterpreterSource};
pub use orchestrator::{ReinstallOutcome, ServerBootstrap};
pub use probe::{CommandRunner, ProbeOutcome, ProcessRunner};
pub use resolver::{Resolution, ResolvedServer, ResolverInputs, ServerOrigin, ServerResolver};
pub use state::{INTERPRETER_PATH_KEY, StateStore, StateStorer};
