//! Language server session
//!
//! A session owns the server process, the JSON-RPC connection to it and the
//! lifecycle forwarders that keep the server's view of open documents current.
//! While a session is live it is the refresh channel's pull source and its
//! push notifications feed the cache.
//!
//! # Modules
//!
//! - [`codec`]: `Content-Length` framing
//! - [`protocol`]: Custom method names and payloads
//! - [`connection`]: Request/response correlation over the framed stream

pub mod codec;
pub mod connection;
pub mod protocol;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_lsp::lsp_types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentItem, Url,
    VersionedTextDocumentIdentifier,
};
use tracing::{debug, info, trace, warn};

use crate::config::Flavor;
use crate::document::key::is_mccode_document;
use crate::document::types::RefreshPayload;
use crate::error::{ConnectionError, SessionError};
use crate::server::resolver::ResolvedServer;
use crate::sync::events::{
    DocumentEvent, EventDispatcher, LifecycleEvent, Priority, Registration,
};
use crate::sync::refresh::RefreshChannel;

pub use connection::{Connection, IncomingNotification};
pub use protocol::{POSITION_REQUEST, PositionParams, PositionResult, VIRTUAL_DOCUMENT_UPDATED};

/// Timeout for the `initialize` request (30 seconds)
const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(30);

/// Time the server gets to exit after `shutdown`/`exit` before it is killed
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub flavor: Flavor,
    pub request_timeout: Duration,
    pub root_uri: Option<Url>,
}

pub struct Session {
    connection: Arc<Connection>,
    refresh: Arc<RefreshChannel>,
    child: Option<Child>,
    tasks: Vec<JoinHandle<()>>,
    registrations: Vec<Registration>,
}

impl Session {
    /// Start the resolved server and complete the handshake
    pub async fn spawn(
        server: &ResolvedServer,
        options: &SessionOptions,
        refresh: Arc<RefreshChannel>,
        dispatcher: &EventDispatcher,
    ) -> Result<Self, SessionError> {
        info!("Starting server: {}", server.command_line());

        let spawn_error = |reason: String| SessionError::Spawn {
            command: server.command_line(),
            reason,
        };

        let mut child = Command::new(&server.command)
            .args(&server.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("no stdout".to_string()))?;
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("server: {}", line);
                }
            })
        });

        let mut session = Self::connect(stdout, stdin, Some(child), options, refresh, dispatcher).await?;
        session.tasks.extend(stderr_task);
        Ok(session)
    }

    /// Run a session over an arbitrary stream pair
    pub async fn connect<R, W>(
        reader: R,
        writer: W,
        child: Option<Child>,
        options: &SessionOptions,
        refresh: Arc<RefreshChannel>,
        dispatcher: &EventDispatcher,
    ) -> Result<Self, SessionError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (connection, notifications) = Connection::new(reader, writer, options.request_timeout);
        let connection = Arc::new(connection);

        let params = protocol::initialize_params(options.root_uri.clone(), options.flavor);
        let _: Value = connection
            .request_with_timeout("initialize", params, INITIALIZE_TIMEOUT)
            .await?;
        connection.notify("initialized", json!({}))?;
        info!("Server initialized");

        let push_task = tokio::spawn(apply_pushes(notifications, refresh.clone()));
        refresh.attach(connection.clone());
        let registrations = register_forwarders(dispatcher, &connection);

        Ok(Self {
            connection,
            refresh,
            child,
            tasks: vec![push_task],
            registrations,
        })
    }

    /// Map a source position into the virtual document
    pub async fn position_in_virtual(
        &self,
        uri: &Url,
        line: u32,
        col: u32,
    ) -> Result<PositionResult, ConnectionError> {
        let params = PositionParams {
            uri: uri.clone(),
            line,
            col,
        };
        self.connection.request(POSITION_REQUEST, params).await
    }

    pub fn is_running(&self) -> bool {
        !self.connection.is_closed()
    }

    /// Orderly teardown: stop routing, `shutdown` + `exit`, then make sure the
    /// process is gone
    pub async fn shutdown(mut self) {
        info!("Shutting down server session");
        self.refresh.detach();
        self.registrations.clear();

        let result: Result<Value, _> = self
            .connection
            .request_with_timeout("shutdown", Value::Null, SHUTDOWN_TIMEOUT)
            .await;
        if let Err(e) = result {
            debug!("shutdown request failed: {}", e);
        }
        let _ = self.connection.notify("exit", Value::Null);
        self.connection.close();

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => debug!("Server exited with {}", status),
                _ => {
                    debug!("Server did not exit in time, killing");
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill server: {}", e);
                    }
                }
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn apply_pushes(
    mut notifications: mpsc::UnboundedReceiver<IncomingNotification>,
    refresh: Arc<RefreshChannel>,
) {
    while let Some(notification) = notifications.recv().await {
        if notification.method != VIRTUAL_DOCUMENT_UPDATED {
            trace!("Ignoring notification {}", notification.method);
            continue;
        }
        match serde_json::from_value::<RefreshPayload>(notification.params) {
            Ok(payload) => refresh.apply_push(payload),
            Err(e) => warn!("Malformed {} notification: {}", VIRTUAL_DOCUMENT_UPDATED, e),
        }
    }
}

fn send_or_log<P: serde::Serialize>(connection: &Connection, method: &str, params: P) {
    if let Err(e) = connection.notify(method, params) {
        debug!("Failed to forward {}: {}", method, e);
    }
}

/// Forward open/change/close of McCode documents as full-text sync
fn register_forwarders(dispatcher: &EventDispatcher, connection: &Arc<Connection>) -> Vec<Registration> {
    let versions: Arc<Mutex<HashMap<Url, i32>>> = Arc::default();

    let opened = {
        let connection = connection.clone();
        let versions = versions.clone();
        dispatcher.register_with_priority(
            LifecycleEvent::Opened,
            Priority::First,
            move |event: &DocumentEvent| {
                let (true, Some(text)) = (is_mccode_document(&event.uri), event.text.as_ref()) else {
                    return;
                };
                versions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(event.uri.clone(), 1);
                send_or_log(
                    &connection,
                    "textDocument/didOpen",
                    DidOpenTextDocumentParams {
                        text_document: TextDocumentItem {
                            uri: event.uri.clone(),
                            language_id: protocol::language_id(&event.uri).to_string(),
                            version: 1,
                            text: text.clone(),
                        },
                    },
                );
            },
        )
    };

    let changed = {
        let connection = connection.clone();
        let versions = versions.clone();
        dispatcher.register_with_priority(
            LifecycleEvent::Changed,
            Priority::First,
            move |event: &DocumentEvent| {
                let (true, Some(text)) = (is_mccode_document(&event.uri), event.text.as_ref()) else {
                    return;
                };
                let version = {
                    let mut versions = versions.lock().unwrap_or_else(PoisonError::into_inner);
                    let version = versions.entry(event.uri.clone()).or_insert(1);
                    *version += 1;
                    *version
                };
                send_or_log(
                    &connection,
                    "textDocument/didChange",
                    DidChangeTextDocumentParams {
                        text_document: VersionedTextDocumentIdentifier {
                            uri: event.uri.clone(),
                            version,
                        },
                        content_changes: vec![TextDocumentContentChangeEvent {
                            range: None,
                            range_length: None,
                            text: text.clone(),
                        }],
                    },
                );
            },
        )
    };

    let closed = {
        let connection = connection.clone();
        dispatcher.register_with_priority(
            LifecycleEvent::Closed,
            Priority::First,
            move |event: &DocumentEvent| {
                if !is_mccode_document(&event.uri) {
                    return;
                }
                versions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&event.uri);
                send_or_log(
                    &connection,
                    "textDocument/didClose",
                    DidCloseTextDocumentParams {
                        text_document: TextDocumentIdentifier {
                            uri: event.uri.clone(),
                        },
                    },
                );
            },
        )
    };

    vec![opened, changed, closed]
}
