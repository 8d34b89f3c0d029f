//! Server installation through pip

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::ResolveError;
use crate::server::probe::{CommandRunner, ProbeOutcome};

/// Keep the tail of pip's output short enough for a notification
const MAX_REASON_CHARS: usize = 400;

pub struct Installer {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
    package: String,
}

impl Installer {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration, package: impl Into<String>) -> Self {
        Self {
            runner,
            timeout,
            package: package.into(),
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    fn install_args(&self) -> Vec<String> {
        ["-m", "pip", "install", "--upgrade", self.package.as_str()]
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Run `<interpreter> -m pip install --upgrade <package>`
    pub async fn install(&self, interpreter: &str) -> Result<(), ResolveError> {
        info!("Installing {} with {}", self.package, interpreter);

        let outcome = self
            .runner
            .run(interpreter, &self.install_args(), self.timeout)
            .await;

        let reason = match outcome {
            ProbeOutcome::Exited { success: true, .. } => {
                info!("Installed {}", self.package);
                return Ok(());
            }
            ProbeOutcome::Exited { stdout, stderr, .. } => {
                let detail = if stderr.trim().is_empty() { stdout } else { stderr };
                tail(detail.trim(), MAX_REASON_CHARS)
            }
            ProbeOutcome::TimedOut => format!("timed out after {}s", self.timeout.as_secs()),
            ProbeOutcome::NotFound => format!("{} not found", interpreter),
            ProbeOutcome::Failed(e) => e,
        };

        warn!("Installing {} failed: {}", self.package, reason);
        Err(ResolveError::InstallFailed {
            interpreter: interpreter.to_string(),
            package: self.package.clone(),
            reason,
        })
    }
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let skipped: String = text.chars().skip(count - max_chars).collect();
    format!("...{}", skipped)
}
