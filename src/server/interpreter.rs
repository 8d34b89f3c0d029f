//! Python interpreter discovery
//!
//! Candidates are tried in order:
//! 1. the configured interpreter path, if it exists
//! 2. the interpreter reported by a companion integration (best-effort)
//! 3. well-known commands on PATH that meet the minimum version

use std::sync::{Arc, LazyLock};
use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use regex::Regex;
use semver::{Comparator, Op, Prerelease, Version, VersionReq};
use tracing::{debug, info};

use crate::config::INTERPRETER_CANDIDATES;
use crate::server::probe::CommandRunner;

static PYTHON_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Python\s+(\d+)\.(\d+)(?:\.(\d+))?").expect("valid regex")
});

/// Where an interpreter was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpreterSource {
    Configured,
    Companion,
    Path,
    Persisted,
}

/// A Python interpreter usable for `python -m mclsp`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub path: String,
    /// Reported version, when it was probed
    pub version: Option<Version>,
    pub source: InterpreterSource,
}

/// Trait for companion tooling that knows the user's active interpreter
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait CompanionInterpreter: Send + Sync {
    /// Path of the active interpreter, if the integration has one
    async fn active_interpreter(&self) -> anyhow::Result<Option<String>>;
}

/// Reports the interpreter of the activated virtualenv or conda environment
#[derive(Debug, Default, Clone, Copy)]
pub struct ActiveEnvironment;

#[async_trait::async_trait]
impl CompanionInterpreter for ActiveEnvironment {
    async fn active_interpreter(&self) -> anyhow::Result<Option<String>> {
        let Some(prefix) = std::env::var_os("VIRTUAL_ENV").or_else(|| std::env::var_os("CONDA_PREFIX"))
        else {
            return Ok(None);
        };
        let bin = if cfg!(windows) { "Scripts/python.exe" } else { "bin/python" };
        let path = std::path::Path::new(&prefix).join(bin);
        anyhow::ensure!(path.exists(), "{} does not exist", path.display());
        Ok(Some(path.to_string_lossy().into_owned()))
    }
}

/// Extract the version from `python --version` output
pub fn parse_python_version(output: &str) -> Option<Version> {
    let captures = PYTHON_VERSION.captures(output)?;
    let major = captures.get(1)?.as_str().parse().ok()?;
    let minor = captures.get(2)?.as_str().parse().ok()?;
    let patch = captures
        .get(3)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    Some(Version::new(major, minor, patch))
}

/// `>=3.<min_minor>`
pub fn minimum_requirement(min_minor: u64) -> VersionReq {
    VersionReq {
        comparators: vec![Comparator {
            op: Op::GreaterEq,
            major: 3,
            minor: Some(min_minor),
            patch: None,
            pre: Prerelease::EMPTY,
        }],
    }
}

pub struct InterpreterFinder {
    runner: Arc<dyn CommandRunner>,
    companion: Arc<dyn CompanionInterpreter>,
    probe_timeout: Duration,
}

impl InterpreterFinder {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        companion: Arc<dyn CompanionInterpreter>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            companion,
            probe_timeout,
        }
    }

    fn version_args() -> Vec<String> {
        vec!["--version".to_string()]
    }

    /// Find a usable interpreter, or None if every candidate fails
    pub async fn find(&self, configured: Option<&str>, min_minor: u64) -> Option<Interpreter> {
        if let Some(path) = configured.map(str::trim).filter(|p| !p.is_empty()) {
            let outcome = self
                .runner
                .run(path, &Self::version_args(), self.probe_timeout)
                .await;
            if outcome.is_present() {
                info!("Using configured interpreter {}", path);
                return Some(Interpreter {
                    path: path.to_string(),
                    version: outcome.output().as_deref().and_then(parse_python_version),
                    source: InterpreterSource::Configured,
                });
            }
            debug!("Configured interpreter {} not found", path);
        }

        // Companion failures never stop discovery
        match self.companion.active_interpreter().await {
            Ok(Some(path)) if !path.trim().is_empty() => {
                info!("Using companion interpreter {}", path);
                return Some(Interpreter {
                    path,
                    version: None,
                    source: InterpreterSource::Companion,
                });
            }
            Ok(_) => debug!("No companion interpreter"),
            Err(e) => debug!("Companion interpreter lookup failed: {}", e),
        }

        let requirement = minimum_requirement(min_minor);
        for candidate in INTERPRETER_CANDIDATES {
            let outcome = self
                .runner
                .run(candidate, &Self::version_args(), self.probe_timeout)
                .await;
            let Some(version) = outcome.output().as_deref().and_then(parse_python_version) else {
                debug!("{} reported no usable version", candidate);
                continue;
            };
            if requirement.matches(&version) {
                info!("Using {} (Python {})", candidate, version);
                return Some(Interpreter {
                    path: candidate.to_string(),
                    version: Some(version),
                    source: InterpreterSource::Path,
                });
            }
            debug!(
                "Rejecting {}: Python {} does not satisfy {}",
                candidate, version, requirement
            );
        }

        None
    }
}
