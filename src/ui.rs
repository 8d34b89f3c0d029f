//! User-facing prompts and notifications

use std::io::{BufRead, Write};
use std::path::PathBuf;

#[cfg(test)]
use mockall::automock;
use tracing::{error, info};

use crate::document::key::VirtualKey;

/// Action offered next to an error notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    OpenSettings,
}

/// What to show when the derived document is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentTarget {
    /// A real file on disk written by the server
    File(PathBuf),
    /// Cached content under its virtual key
    Inline { key: VirtualKey, content: String },
}

/// Trait for the editor surface the client talks to the user through
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait UserInterface: Send + Sync {
    /// Ask before installing `package` with `interpreter`
    async fn confirm_install(&self, interpreter: &str, package: &str) -> bool;

    /// Ask whether to restart the server after a reinstall
    async fn confirm_reload(&self) -> bool;

    async fn show_error(&self, message: &str, action: Option<ErrorAction>);

    async fn show_progress(&self, message: &str);

    async fn open_virtual_document(&self, target: DocumentTarget);
}

/// Terminal implementation: prompts on stderr, reads answers from stdin
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalUi {
    /// Answer yes to every prompt without reading stdin
    pub assume_yes: bool,
}

impl TerminalUi {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }

    async fn ask(&self, question: String) -> bool {
        if self.assume_yes {
            info!("{} yes (assumed)", question);
            return true;
        }
        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "{} [y/N] ", question);
            let _ = stderr.flush();
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => is_yes(&line),
            _ => false,
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[async_trait::async_trait]
impl UserInterface for TerminalUi {
    async fn confirm_install(&self, interpreter: &str, package: &str) -> bool {
        self.ask(format!(
            "The {} language server is not installed. Install it with `{} -m pip install {}`?",
            package, interpreter, package
        ))
        .await
    }

    async fn confirm_reload(&self) -> bool {
        self.ask("Server reinstalled. Restart it now?".to_string())
            .await
    }

    async fn show_error(&self, message: &str, action: Option<ErrorAction>) {
        error!("{}", message);
        match action {
            Some(ErrorAction::OpenSettings) => {
                eprintln!("error: {}\n  (adjust the `server` section of your configuration)", message)
            }
            None => eprintln!("error: {}", message),
        }
    }

    async fn show_progress(&self, message: &str) {
        info!("{}", message);
        eprintln!("{}", message);
    }

    async fn open_virtual_document(&self, target: DocumentTarget) {
        match target {
            DocumentTarget::File(path) => println!("{}", path.display()),
            DocumentTarget::Inline { content, .. } => println!("{}", content),
        }
    }
}
