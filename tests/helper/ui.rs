//! User interface test double

use std::sync::Mutex;

use async_trait::async_trait;

use mclsp_client::ui::{DocumentTarget, ErrorAction, UserInterface};

/// Answers every prompt with a fixed value and records what was shown
#[derive(Default)]
pub struct RecordingUi {
    pub consent: bool,
    pub errors: Mutex<Vec<(String, Option<ErrorAction>)>>,
    pub opened: Mutex<Vec<DocumentTarget>>,
}

impl RecordingUi {
    #[allow(dead_code)]
    pub fn opened(&self) -> Vec<DocumentTarget> {
        self.opened.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn errors(&self) -> Vec<(String, Option<ErrorAction>)> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait]
impl UserInterface for RecordingUi {
    async fn confirm_install(&self, _interpreter: &str, _package: &str) -> bool {
        self.consent
    }

    async fn confirm_reload(&self) -> bool {
        self.consent
    }

    async fn show_error(&self, message: &str, action: Option<ErrorAction>) {
        self.errors
            .lock()
            .unwrap()
            .push((message.to_string(), action));
    }

    async fn show_progress(&self, _message: &str) {}

    async fn open_virtual_document(&self, target: DocumentTarget) {
        self.opened.lock().unwrap().push(target);
    }
}
