//! Client activation, lifecycle routing and the command surface

use std::sync::Arc;
use std::time::Duration;

use tower_lsp::lsp_types::Url;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::document::cache::VirtualDocumentCache;
use crate::document::key::{VirtualKey, is_mccode_document};
use crate::document::types::VirtualDocument;
use crate::error::{CommandError, SessionError};
use crate::server::orchestrator::{ReinstallOutcome, ServerBootstrap};
use crate::server::resolver::{ResolvedServer, ResolverInputs};
use crate::session::{Session, SessionOptions};
use crate::sync::events::{DocumentEvent, EventDispatcher, LifecycleEvent, Registration};
use crate::sync::refresh::{RefreshChannel, SyncRequest, SyncTrigger};
use crate::sync::scheduler::SyncScheduler;
use crate::ui::{DocumentTarget, UserInterface};

/// The document focused in the editor when a command runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDocument {
    pub uri: Url,
    pub text: Option<String>,
}

pub struct Extension {
    config: ClientConfig,
    env_override: Option<String>,
    root_uri: Option<Url>,
    refresh: Arc<RefreshChannel>,
    scheduler: Arc<SyncScheduler>,
    dispatcher: EventDispatcher,
    bootstrap: ServerBootstrap,
    ui: Arc<dyn UserInterface>,
    session: Option<Session>,
    _passive: Vec<Registration>,
}

impl Extension {
    /// Set up the cache, the refresh channel and the scheduler; these stay
    /// usable whether or not a server session ever starts
    pub fn new(
        config: ClientConfig,
        env_override: Option<String>,
        bootstrap: ServerBootstrap,
        ui: Arc<dyn UserInterface>,
    ) -> Self {
        let cache = Arc::new(VirtualDocumentCache::new());
        let refresh = Arc::new(RefreshChannel::new(cache));
        let scheduler = Arc::new(SyncScheduler::new(
            refresh.clone(),
            Duration::from_millis(config.sync.debounce_ms),
        ));
        let dispatcher = EventDispatcher::new();
        let passive = register_scheduler(&dispatcher, &scheduler);

        Self {
            config,
            env_override,
            root_uri: None,
            refresh,
            scheduler,
            dispatcher,
            bootstrap,
            ui,
            session: None,
            _passive: passive,
        }
    }

    /// Workspace root announced to the server
    pub fn with_root_uri(mut self, root_uri: Option<Url>) -> Self {
        self.root_uri = root_uri;
        self
    }

    fn resolver_inputs(&self) -> ResolverInputs {
        ResolverInputs::from_config(&self.config.server, self.env_override.clone())
    }

    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            flavor: self.config.flavor,
            request_timeout: Duration::from_millis(self.config.sync.request_timeout_ms),
            root_uri: self.root_uri.clone(),
        }
    }

    /// Resolve and start the server. On failure the client stays inert but
    /// intact and `false` is returned.
    pub async fn activate(&mut self) -> bool {
        let Some(server) = self.bootstrap.resolve(&self.resolver_inputs()).await else {
            warn!("No language server available; virtual documents are disabled");
            return false;
        };
        self.start_session(&server).await
    }

    async fn start_session(&mut self, server: &ResolvedServer) -> bool {
        match Session::spawn(
            server,
            &self.session_options(),
            self.refresh.clone(),
            &self.dispatcher,
        )
        .await
        {
            Ok(session) => {
                self.session = Some(session);
                true
            }
            Err(e) => {
                self.ui.show_error(&e.to_string(), None).await;
                false
            }
        }
    }

    /// Install an already connected session, replacing any current one
    pub async fn attach_session(&mut self, session: Session) {
        if let Some(previous) = self.session.replace(session) {
            previous.shutdown().await;
        }
    }

    /// Connect a session over an arbitrary stream pair
    pub async fn connect_session<R, W>(&mut self, reader: R, writer: W) -> Result<(), SessionError>
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
        W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        if let Some(previous) = self.session.take() {
            previous.shutdown().await;
        }
        let session = Session::connect(
            reader,
            writer,
            None,
            &self.session_options(),
            self.refresh.clone(),
            &self.dispatcher,
        )
        .await?;
        self.session = Some(session);
        Ok(())
    }

    pub fn did_open(&self, uri: Url, text: String) {
        self.dispatcher.dispatch(
            LifecycleEvent::Opened,
            &DocumentEvent {
                uri,
                text: Some(text),
            },
        );
    }

    pub fn did_change(&self, uri: Url, text: String) {
        self.dispatcher.dispatch(
            LifecycleEvent::Changed,
            &DocumentEvent {
                uri,
                text: Some(text),
            },
        );
    }

    pub fn did_close(&self, uri: Url) {
        self.dispatcher
            .dispatch(LifecycleEvent::Closed, &DocumentEvent { uri, text: None });
    }

    /// Content provider: the cached text for a virtual key, or the placeholder
    pub fn content(&self, key: &VirtualKey) -> String {
        self.refresh.cache().read(key)
    }

    pub fn cache(&self) -> &Arc<VirtualDocumentCache> {
        self.refresh.cache()
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Show the derived document of the active source.
    ///
    /// Pulls synchronously and opens the materialized file when the server
    /// wrote one, the cached content otherwise. Failures are shown to the user.
    pub async fn show_virtual_document(
        &self,
        active: Option<&ActiveDocument>,
    ) -> Result<VirtualDocument, CommandError> {
        let result = self.pull_for_command(active).await;
        match result {
            Ok(document) => {
                let target = match &document.temp_path {
                    Some(path) if path.exists() => DocumentTarget::File(path.clone()),
                    _ => DocumentTarget::Inline {
                        key: document.key.clone(),
                        content: document.content.clone(),
                    },
                };
                self.ui.open_virtual_document(target).await;
                Ok(document)
            }
            Err(e) => {
                self.ui
                    .show_error(&format!("Cannot show virtual C document: {}", e), None)
                    .await;
                Err(e)
            }
        }
    }

    async fn pull_for_command(
        &self,
        active: Option<&ActiveDocument>,
    ) -> Result<VirtualDocument, CommandError> {
        let active = active.ok_or(CommandError::NoActiveDocument)?;
        if !is_mccode_document(&active.uri) {
            return Err(CommandError::NotMcCode(active.uri.to_string()));
        }
        let document = self
            .refresh
            .pull(SyncRequest {
                uri: active.uri.clone(),
                text: active.text.clone(),
                trigger: SyncTrigger::Command,
            })
            .await?;
        Ok(document)
    }

    /// Reinstall the server package; restarts the session if the user agrees
    pub async fn reinstall_server(&mut self) -> Result<ReinstallOutcome, CommandError> {
        let outcome = match self.bootstrap.reinstall(&self.resolver_inputs()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.ui.show_error(&e.to_string(), None).await;
                return Err(e.into());
            }
        };

        if outcome.reload {
            info!("Restarting server after reinstall");
            if let Some(previous) = self.session.take() {
                previous.shutdown().await;
            }
            self.start_session(&outcome.server).await;
        }
        Ok(outcome)
    }

    /// Tear down the session; pending timers are cancelled
    pub async fn deactivate(&mut self) {
        self.scheduler.cancel_all();
        if let Some(session) = self.session.take() {
            session.shutdown().await;
        }
    }
}

/// Route McCode lifecycle events into the scheduler
fn register_scheduler(dispatcher: &EventDispatcher, scheduler: &Arc<SyncScheduler>) -> Vec<Registration> {
    let opened = {
        let scheduler = scheduler.clone();
        dispatcher.register(LifecycleEvent::Opened, move |event: &DocumentEvent| {
            if is_mccode_document(&event.uri) {
                let _ = scheduler.did_open(event.uri.clone(), event.text.clone().unwrap_or_default());
            }
        })
    };
    let changed = {
        let scheduler = scheduler.clone();
        dispatcher.register(LifecycleEvent::Changed, move |event: &DocumentEvent| {
            if is_mccode_document(&event.uri) {
                scheduler.did_change(event.uri.clone(), event.text.clone().unwrap_or_default());
            }
        })
    };
    let closed = {
        let scheduler = scheduler.clone();
        dispatcher.register(LifecycleEvent::Closed, move |event: &DocumentEvent| {
            if is_mccode_document(&event.uri) {
                scheduler.did_close(&event.uri);
            }
        })
    };
    vec![opened, changed, closed]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::cache::NOT_YET_AVAILABLE;
    use crate::document::types::RefreshPayload;
    use crate::error::{ConnectionError, RefreshError};
    use crate::server::install::Installer;
    use crate::server::interpreter::MockCompanionInterpreter;
    use crate::server::probe::{MockCommandRunner, ProbeOutcome};
    use crate::server::resolver::ServerResolver;
    use crate::server::state::MockStateStorer;
    use crate::sync::refresh::MockVirtualDocumentSource;
    use crate::ui::{ErrorAction, MockUserInterface};
    use tempfile::TempDir;

    fn bootstrap(runner: MockCommandRunner, ui: Arc<MockUserInterface>) -> ServerBootstrap {
        let runner = Arc::new(runner);
        let mut companion = MockCompanionInterpreter::new();
        companion.expect_active_interpreter().returning(|| Ok(None));
        ServerBootstrap::new(
            ServerResolver::new(runner.clone(), Arc::new(companion), Duration::from_secs(5)),
            Installer::new(runner, Duration::from_secs(300), "mclsp"),
            Arc::new(MockStateStorer::new()),
            ui,
        )
    }

    fn extension(ui: MockUserInterface) -> Extension {
        let ui = Arc::new(ui);
        Extension::new(
            ClientConfig::default(),
            None,
            bootstrap(MockCommandRunner::new(), ui.clone()),
            ui,
        )
    }

    fn active(name: &str) -> ActiveDocument {
        ActiveDocument {
            uri: Url::parse(&format!("file:///sim/{name}")).unwrap(),
            text: Some("DEFINE INSTRUMENT foo()".to_string()),
        }
    }

    fn source_returning(temp_path: Option<std::path::PathBuf>) -> MockVirtualDocumentSource {
        let mut source = MockVirtualDocumentSource::new();
        source
            .expect_request_virtual_document()
            .returning(move |uri, _| {
                Ok(Some(RefreshPayload {
                    uri: Some(uri.to_string()),
                    virtual_uri: Some(format!("mccode-c://{}.c", uri.path())),
                    content: Some("int main(void);".to_string()),
                    temp_path: temp_path.clone(),
                    regions: Vec::new(),
                }))
            });
        source
    }

    #[tokio::test]
    async fn activation_failure_leaves_passive_parts_intact() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_, _, _| ProbeOutcome::NotFound);
        let mut ui = MockUserInterface::new();
        ui.expect_show_error()
            .withf(|_, action| *action == Some(ErrorAction::OpenSettings))
            .times(1)
            .return_const(());
        let ui = Arc::new(ui);
        let mut extension = Extension::new(
            ClientConfig::default(),
            None,
            bootstrap(runner, ui.clone()),
            ui,
        );

        assert!(!extension.activate().await);

        assert!(extension.session().is_none());
        assert_eq!(extension.dispatcher().handler_count(LifecycleEvent::Opened), 1);
        let key = VirtualKey::for_source(&active("foo.instr").uri);
        assert_eq!(extension.content(&key), NOT_YET_AVAILABLE);
    }

    #[tokio::test]
    async fn show_prefers_materialized_file() {
        let temp_dir = TempDir::new().unwrap();
        let temp_path = temp_dir.path().join("mclsp_foo.c");
        std::fs::write(&temp_path, "int main(void);").unwrap();

        let expected = temp_path.clone();
        let mut ui = MockUserInterface::new();
        ui.expect_open_virtual_document()
            .withf(move |target| *target == DocumentTarget::File(expected.clone()))
            .times(1)
            .return_const(());
        let extension = extension(ui);
        extension
            .refresh
            .attach(Arc::new(source_returning(Some(temp_path))));

        let document = extension
            .show_virtual_document(Some(&active("foo.instr")))
            .await
            .unwrap();

        assert_eq!(document.key.as_str(), "mc-virtual:///sim/foo.instr.c");
        assert_eq!(extension.content(&document.key), "int main(void);");
    }

    #[tokio::test]
    async fn show_falls_back_to_inline_content_when_temp_file_is_missing() {
        let mut ui = MockUserInterface::new();
        ui.expect_open_virtual_document()
            .withf(|target| {
                matches!(target, DocumentTarget::Inline { content, .. } if content == "int main(void);")
            })
            .times(1)
            .return_const(());
        let extension = extension(ui);
        extension.refresh.attach(Arc::new(source_returning(Some(
            "/nonexistent/mclsp_foo.c".into(),
        ))));

        assert!(
            extension
                .show_virtual_document(Some(&active("foo.instr")))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn show_surfaces_pull_failure() {
        let mut source = MockVirtualDocumentSource::new();
        source
            .expect_request_virtual_document()
            .returning(|_, _| {
                Err(ConnectionError::Timeout {
                    method: "$/mclsp/virtualCDocument".to_string(),
                    timeout_ms: 10_000,
                })
            });
        let mut ui = MockUserInterface::new();
        ui.expect_show_error()
            .withf(|message, _| message.contains("timed out"))
            .times(1)
            .return_const(());
        ui.expect_open_virtual_document().times(0);
        let extension = extension(ui);
        extension.refresh.attach(Arc::new(source));

        let result = extension
            .show_virtual_document(Some(&active("foo.instr")))
            .await;

        assert!(matches!(
            result,
            Err(CommandError::Refresh(RefreshError::Connection(_)))
        ));
    }

    #[tokio::test]
    async fn show_without_session_reports_not_ready() {
        let mut ui = MockUserInterface::new();
        ui.expect_show_error().times(1).return_const(());
        let extension = extension(ui);

        let result = extension
            .show_virtual_document(Some(&active("foo.instr")))
            .await;

        assert!(matches!(
            result,
            Err(CommandError::Refresh(RefreshError::NotReady))
        ));
    }

    #[tokio::test]
    async fn show_rejects_missing_or_foreign_documents() {
        let mut ui = MockUserInterface::new();
        ui.expect_show_error().times(2).return_const(());
        let extension = extension(ui);

        assert!(matches!(
            extension.show_virtual_document(None).await,
            Err(CommandError::NoActiveDocument)
        ));
        assert!(matches!(
            extension
                .show_virtual_document(Some(&active("notes.txt")))
                .await,
            Err(CommandError::NotMcCode(_))
        ));
    }

    #[tokio::test]
    async fn lifecycle_events_for_other_files_are_ignored() {
        let mut source = MockVirtualDocumentSource::new();
        source.expect_request_virtual_document().times(0);
        let extension = extension(MockUserInterface::new());
        extension.refresh.attach(Arc::new(source));

        let uri = Url::parse("file:///sim/README.md").unwrap();
        extension.did_change(uri.clone(), "text".to_string());

        assert!(!extension.scheduler().has_pending(&uri));
    }

    #[tokio::test]
    async fn close_removes_cached_document() {
        let extension = extension(MockUserInterface::new());
        extension.refresh.attach(Arc::new(source_returning(None)));
        let doc = active("foo.instr");
        extension
            .refresh
            .pull(SyncRequest {
                uri: doc.uri.clone(),
                text: doc.text.clone(),
                trigger: SyncTrigger::Open,
            })
            .await
            .unwrap();
        let key = VirtualKey::for_source(&doc.uri);
        assert!(extension.cache().contains(&key));

        extension.did_close(doc.uri);

        assert!(!extension.cache().contains(&key));
    }
}
