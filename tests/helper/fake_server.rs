//! In-process stand-in for the mclsp server, speaking the framed protocol
//! over duplex streams

use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{DuplexStream, duplex};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tower_lsp::jsonrpc::Request;
use tower_lsp::lsp_types::Url;

use mclsp_client::session::codec::{MessageReader, MessageWriter};
use mclsp_client::session::protocol::{
    POSITION_REQUEST, VIRTUAL_DOCUMENT_REQUEST, VIRTUAL_DOCUMENT_UPDATED,
};

/// Client ends of the streams plus a handle on the fake server
pub struct FakeServer {
    pub client_read: Option<DuplexStream>,
    pub client_write: Option<DuplexStream>,
    received: mpsc::UnboundedReceiver<Value>,
    push: mpsc::UnboundedSender<Value>,
}

/// Virtual content the fake server produces for a source text
pub fn translate(text: Option<&str>) -> String {
    format!("/* translated */\n{}\n", text.unwrap_or("<no text>"))
}

/// Server-side virtual URI, on the server's own scheme
pub fn server_virtual_uri(uri: &Url) -> String {
    format!("mccode-c://{}.c", uri.path())
}

impl FakeServer {
    /// Start the server loop. When `temp_dir` is set, every pull also writes
    /// the content to a file there and reports it as `tempPath`.
    pub fn spawn(temp_dir: Option<PathBuf>) -> Self {
        let (client_read, server_write) = duplex(256 * 1024);
        let (server_read, client_write) = duplex(256 * 1024);
        let (received_tx, received) = mpsc::unbounded_channel();
        let (push, mut push_rx) = mpsc::unbounded_channel::<Value>();

        tokio::spawn(async move {
            let mut reader = MessageReader::new(server_read);
            let mut writer = MessageWriter::new(server_write);
            let mut documents: std::collections::HashMap<String, String> = Default::default();

            loop {
                tokio::select! {
                    message = reader.read_message() => {
                        let Ok(Some(message)) = message else { break };
                        if let Some(reply) = handle(&message, &mut documents, temp_dir.as_ref()) {
                            if writer.write_message(&reply).await.is_err() {
                                break;
                            }
                        }
                        let _ = received_tx.send(message);
                    }
                    Some(notification) = push_rx.recv() => {
                        if writer.write_message(&notification).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            client_read: Some(client_read),
            client_write: Some(client_write),
            received,
            push,
        }
    }

    /// Take the client ends for `Extension::connect_session`
    pub fn client_streams(&mut self) -> (DuplexStream, DuplexStream) {
        (
            self.client_read.take().expect("streams already taken"),
            self.client_write.take().expect("streams already taken"),
        )
    }

    /// Send `$/mclsp/virtualCDocumentUpdated` to the client
    pub fn push_update(&self, uri: &Url, content: &str) {
        let notification = Request::build(VIRTUAL_DOCUMENT_UPDATED)
            .params(json!({
                "uri": uri.as_str(),
                "virtualUri": server_virtual_uri(uri),
                "content": content,
            }))
            .finish();
        self.push
            .send(serde_json::to_value(notification).unwrap())
            .unwrap();
    }

    /// Wait for the next client message with `method`, skipping others
    pub async fn expect_method(&mut self, method: &str) -> Value {
        timeout(Duration::from_secs(5), async {
            loop {
                let message = self.received.recv().await.expect("server stopped");
                if message["method"] == method {
                    return message;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", method))
    }

    /// Next client message of any kind, in arrival order
    #[allow(dead_code)]
    pub async fn next_message(&mut self) -> Value {
        timeout(Duration::from_secs(5), self.received.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("server stopped")
    }
}

fn handle(
    message: &Value,
    documents: &mut std::collections::HashMap<String, String>,
    temp_dir: Option<&PathBuf>,
) -> Option<Value> {
    let method = message["method"].as_str()?;
    let params = &message["params"];

    match method {
        "textDocument/didOpen" => {
            documents.insert(
                params["textDocument"]["uri"].as_str()?.to_string(),
                params["textDocument"]["text"].as_str()?.to_string(),
            );
            return None;
        }
        "textDocument/didChange" => {
            documents.insert(
                params["textDocument"]["uri"].as_str()?.to_string(),
                params["contentChanges"][0]["text"].as_str()?.to_string(),
            );
            return None;
        }
        _ => {}
    }

    let id = message.get("id")?.clone();
    let result = match method {
        "initialize" => json!({ "capabilities": {} }),
        "shutdown" => Value::Null,
        VIRTUAL_DOCUMENT_REQUEST => {
            let uri = Url::parse(params["uri"].as_str()?).ok()?;
            let text = params["text"]
                .as_str()
                .map(String::from)
                .or_else(|| documents.get(uri.as_str()).cloned());
            let content = translate(text.as_deref());
            let mut result = json!({
                "uri": uri.as_str(),
                "virtualUri": server_virtual_uri(&uri),
                "content": content,
                "regions": [{
                    "section": "TRACE",
                    "label": "",
                    "mccodeLine": 1,
                    "virtualLine": 2,
                    "contentLines": 1
                }]
            });
            if let Some(dir) = temp_dir {
                let path = dir.join("mclsp_virtual.c");
                std::fs::write(&path, &content).ok()?;
                result["tempPath"] = json!(path);
            }
            result
        }
        POSITION_REQUEST => {
            let uri = Url::parse(params["uri"].as_str()?).ok()?;
            json!({
                "inCRegion": true,
                "virtualUri": server_virtual_uri(&uri),
                "virtualLine": params["line"].as_u64()? + 1,
                "virtualCol": params["col"],
            })
        }
        _ => Value::Null,
    };

    Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}
