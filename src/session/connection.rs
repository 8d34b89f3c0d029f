//! JSON-RPC connection to the server process
//!
//! One writer task drains an outbound queue into the server's stdin; one
//! reader task routes responses to waiting requests, answers server-initiated
//! requests with `null` and forwards notifications to the session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tower_lsp::lsp_types::Url;
use tracing::{debug, trace, warn};

use crate::document::types::RefreshPayload;
use crate::error::ConnectionError;
use crate::session::codec::{MessageReader, MessageWriter};
use crate::session::protocol::{self, VIRTUAL_DOCUMENT_REQUEST, VirtualDocumentParams};
use crate::sync::refresh::VirtualDocumentSource;

enum Outbound {
    Send(Value),
    Shutdown,
}

/// Notification received from the server
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingNotification {
    pub method: String,
    pub params: Value,
}

type PendingMap = HashMap<i64, oneshot::Sender<Value>>;

fn lock(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Connection {
    outbound: mpsc::UnboundedSender<Outbound>,
    pending: Arc<Mutex<PendingMap>>,
    next_id: AtomicI64,
    request_timeout: Duration,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Connection {
    /// Start the reader and writer tasks over a byte stream pair
    pub fn new<R, W>(
        reader: R,
        writer: W,
        request_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<IncomingNotification>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (notifications, notifications_rx) = mpsc::unbounded_channel();
        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));

        let writer_task = tokio::spawn(async move {
            let mut writer = MessageWriter::new(writer);
            while let Some(command) = outbound_rx.recv().await {
                match command {
                    Outbound::Send(message) => {
                        if let Err(e) = writer.write_message(&message).await {
                            warn!("Failed to write to server: {}", e);
                            break;
                        }
                    }
                    Outbound::Shutdown => break,
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_outbound = outbound.clone();
        let reader_task = tokio::spawn(async move {
            let mut reader = MessageReader::new(reader);
            loop {
                match reader.read_message().await {
                    Ok(Some(message)) => {
                        route_message(message, &reader_pending, &reader_outbound, &notifications)
                    }
                    Ok(None) => {
                        debug!("Server closed its output");
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read from server: {}", e);
                        break;
                    }
                }
            }
            // Wake every waiting request with a closed channel
            lock(&reader_pending).clear();
        });

        let connection = Self {
            outbound,
            pending,
            next_id: AtomicI64::new(1),
            request_timeout,
            reader_task,
            writer_task,
        };
        (connection, notifications_rx)
    }

    /// Send a request and wait for its result, using the default timeout
    pub async fn request<P, T>(&self, method: &str, params: P) -> Result<T, ConnectionError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        self.request_with_timeout(method, params, self.request_timeout)
            .await
    }

    pub async fn request_with_timeout<P, T>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> Result<T, ConnectionError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        if self.reader_task.is_finished() {
            return Err(ConnectionError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let params = serde_json::to_value(params)?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        trace!("-> {} #{}", method, id);
        if self
            .outbound
            .send(Outbound::Send(protocol::request(id, method, params)))
            .is_err()
        {
            lock(&self.pending).remove(&id);
            return Err(ConnectionError::Closed);
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ConnectionError::Closed),
            Err(_) => {
                lock(&self.pending).remove(&id);
                return Err(ConnectionError::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(ConnectionError::Server {
                method: method.to_string(),
                message,
            });
        }

        let result = response.get("result").cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(result)?)
    }

    pub fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<(), ConnectionError> {
        let params = serde_json::to_value(params)?;
        trace!("-> {}", method);
        self.outbound
            .send(Outbound::Send(protocol::notification(method, params)))
            .map_err(|_| ConnectionError::Closed)
    }

    /// Flush what is queued, then stop writing
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.reader_task.is_finished() || self.writer_task.is_finished()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

fn route_message(
    message: Value,
    pending: &Mutex<PendingMap>,
    outbound: &mpsc::UnboundedSender<Outbound>,
    notifications: &mpsc::UnboundedSender<IncomingNotification>,
) {
    let id = message.get("id").cloned();
    let method = message
        .get("method")
        .and_then(Value::as_str)
        .map(String::from);

    match (id, method) {
        (Some(id), None) => {
            let Some(id) = id.as_i64() else {
                trace!("Ignoring response with non-numeric id {}", id);
                return;
            };
            match lock(pending).remove(&id) {
                Some(tx) => {
                    let _ = tx.send(message);
                }
                None => trace!("Ignoring response for unknown request #{}", id),
            }
        }
        (Some(id), Some(method)) => {
            debug!("Server request {}; replying null", method);
            let _ = outbound.send(Outbound::Send(protocol::response(id, Value::Null)));
        }
        (None, Some(method)) => {
            let params = message.get("params").cloned().unwrap_or(Value::Null);
            let _ = notifications.send(IncomingNotification { method, params });
        }
        (None, None) => trace!("Ignoring malformed message"),
    }
}

#[async_trait::async_trait]
impl VirtualDocumentSource for Connection {
    async fn request_virtual_document(
        &self,
        uri: &Url,
        text: Option<String>,
    ) -> Result<Option<RefreshPayload>, ConnectionError> {
        let params = VirtualDocumentParams {
            uri: uri.clone(),
            text,
        };
        self.request(VIRTUAL_DOCUMENT_REQUEST, params).await
    }
}
