//! External command probing

use std::process::Stdio;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::debug;

/// Result of running an external command with a timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The program does not exist
    NotFound,
    /// The program ran past the timeout and was killed
    TimedOut,
    /// The program exited, successfully or not
    Exited {
        success: bool,
        stdout: String,
        stderr: String,
    },
    /// The program exists but could not be run (e.g. permission denied)
    Failed(String),
}

impl ProbeOutcome {
    /// Anything other than "command not found" counts as present
    pub fn is_present(&self) -> bool {
        !matches!(self, ProbeOutcome::NotFound)
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, ProbeOutcome::Exited { success: true, .. })
    }

    /// Combined stdout and stderr, for version strings printed to either
    pub fn output(&self) -> Option<String> {
        match self {
            ProbeOutcome::Exited { stdout, stderr, .. } => Some(format!("{stdout}\n{stderr}")),
            _ => None,
        }
    }
}

/// Trait for running external commands
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, killing it after `timeout`
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> ProbeOutcome;
}

/// Runs commands as child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait::async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> ProbeOutcome {
        debug!("Running {} {:?} (timeout {:?})", program, args, timeout);

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} not found", program);
                return ProbeOutcome::NotFound;
            }
            Err(e) => return ProbeOutcome::Failed(e.to_string()),
        };

        // Dropping the wait future on timeout drops the child, which kills it
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Err(_) => {
                debug!("{} timed out after {:?}", program, timeout);
                ProbeOutcome::TimedOut
            }
            Ok(Err(e)) => ProbeOutcome::Failed(e.to_string()),
            Ok(Ok(output)) => ProbeOutcome::Exited {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
        }
    }
}
