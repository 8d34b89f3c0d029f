//! LSP base protocol framing
//!
//! `Content-Length: N\r\n\r\n{json}` over the server's stdin/stdout.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::ConnectionError;

/// Largest accepted message body (16 MiB); virtual documents of big
/// instruments run to a few hundred KiB
const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

pub struct MessageReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next message; `Ok(None)` on a clean EOF between messages
    pub async fn read_message(&mut self) -> Result<Option<Value>, ConnectionError> {
        let Some(length) = self.read_headers().await? else {
            return Ok(None);
        };

        if length > MAX_MESSAGE_BYTES {
            return Err(ConnectionError::InvalidHeader(format!(
                "Content-Length {} exceeds {}",
                length, MAX_MESSAGE_BYTES
            )));
        }

        let mut body = vec![0u8; length];
        self.reader.read_exact(&mut body).await?;
        let value = serde_json::from_slice(&body)?;
        Ok(Some(value))
    }

    async fn read_headers(&mut self) -> Result<Option<usize>, ConnectionError> {
        let mut content_length = None;
        let mut line = String::new();
        let mut started = false;

        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                if !started {
                    return Ok(None);
                }
                return Err(ConnectionError::InvalidHeader(
                    "unexpected EOF in headers".to_string(),
                ));
            }
            started = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            let Some((name, value)) = trimmed.split_once(':') else {
                return Err(ConnectionError::InvalidHeader(trimmed.to_string()));
            };
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                let length = value
                    .trim()
                    .parse()
                    .map_err(|_| ConnectionError::InvalidHeader(trimmed.to_string()))?;
                content_length = Some(length);
            }
        }

        content_length
            .map(Some)
            .ok_or_else(|| ConnectionError::InvalidHeader("missing Content-Length".to_string()))
    }
}

pub struct MessageWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_message(&mut self, message: &Value) -> Result<(), ConnectionError> {
        let body = serde_json::to_vec(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    #[tokio::test]
    async fn reads_consecutive_messages_then_eof() {
        let mut input = frame(r#"{"jsonrpc":"2.0","id":1,"result":null}"#);
        input.extend(frame(r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#));

        let mut reader = MessageReader::new(input.as_slice());

        assert_eq!(reader.read_message().await.unwrap().unwrap()["id"], 1);
        assert_eq!(
            reader.read_message().await.unwrap().unwrap()["method"],
            "initialized"
        );
        assert!(reader.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn content_length_counts_bytes_not_chars() {
        let body = r#"{"content":"/* é */"}"#;
        let input = frame(body);
        let mut reader = MessageReader::new(input.as_slice());

        let message = reader.read_message().await.unwrap().unwrap();

        assert_eq!(message["content"], "/* é */");
    }

    #[tokio::test]
    async fn extra_headers_are_ignored() {
        let body = r#"{"id":7}"#;
        let input = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let mut reader = MessageReader::new(input.as_bytes());

        assert_eq!(reader.read_message().await.unwrap().unwrap()["id"], 7);
    }

    #[tokio::test]
    async fn missing_content_length_is_an_error() {
        let input: &[u8] = b"Content-Type: application/json\r\n\r\n{}";
        let mut reader = MessageReader::new(input);

        assert!(matches!(
            reader.read_message().await,
            Err(ConnectionError::InvalidHeader(_))
        ));
    }

    #[tokio::test]
    async fn eof_inside_headers_is_an_error() {
        let input: &[u8] = b"Content-Length: 10\r\n";
        let mut reader = MessageReader::new(input);

        assert!(reader.read_message().await.is_err());
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        let input: &[u8] = b"Content-Length: 100\r\n\r\n{}";
        let mut reader = MessageReader::new(input);

        assert!(matches!(
            reader.read_message().await,
            Err(ConnectionError::Io(_))
        ));
    }

    #[tokio::test]
    async fn written_message_is_readable() {
        let message = json!({"jsonrpc": "2.0", "method": "exit"});
        let mut buffer = Vec::new();
        MessageWriter::new(&mut buffer)
            .write_message(&message)
            .await
            .unwrap();

        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("Content-Length: "));
        let mut reader = MessageReader::new(buffer.as_slice());
        assert_eq!(reader.read_message().await.unwrap().unwrap(), message);
    }
}
