//! JSON-RPC framing for the server's stdio streams.
//!
//! Each message is `Content-Length: N\r\n\r\n` followed by `N` bytes of JSON.
//! Other headers are accepted and ignored.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

const CONTENT_LENGTH: &str = "Content-Length";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        source: io::Error,
    },
    #[error("stream ended inside a header block")]
    TruncatedHeaders,
    #[error("header block has no Content-Length")]
    MissingLength,
    #[error("invalid Content-Length value '{0}'")]
    BadLength(String),
    #[error("Content-Length {0} exceeds maximum {MAX_FRAME_BYTES}")]
    TooLarge(usize),
    #[error("malformed JSON-RPC body: {0}")]
    Json(#[from] serde_json::Error),
}

fn io_err(context: &'static str) -> impl FnOnce(io::Error) -> CodecError {
    move |source| CodecError::Io { context, source }
}

/// `Some(len)` for a Content-Length header line, `None` for any other header.
fn content_length(line: &str) -> Result<Option<usize>, CodecError> {
    let Some((key, value)) = line.split_once(':') else {
        return Ok(None);
    };
    if !key.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
        return Ok(None);
    }
    let value = value.trim();
    value
        .parse()
        .map(Some)
        .map_err(|_| CodecError::BadLength(value.to_string()))
}

pub struct FrameReader<R> {
    reader: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: String::new(),
        }
    }

    /// Next frame, or `Ok(None)` when the stream ends between frames.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, CodecError> {
        let Some(len) = self.read_header_block().await? else {
            return Ok(None);
        };
        if len > MAX_FRAME_BYTES {
            return Err(CodecError::TooLarge(len));
        }

        let mut body = vec![0u8; len];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(io_err("reading frame body"))?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    async fn read_header_block(&mut self) -> Result<Option<usize>, CodecError> {
        let mut len = None;
        let mut first = true;
        loop {
            self.line.clear();
            let read = self
                .reader
                .read_line(&mut self.line)
                .await
                .map_err(io_err("reading header line"))?;
            if read == 0 {
                return if first {
                    Ok(None)
                } else {
                    Err(CodecError::TruncatedHeaders)
                };
            }
            first = false;

            let header = self.line.trim();
            if header.is_empty() {
                return len.map(Some).ok_or(CodecError::MissingLength);
            }
            if let Some(parsed) = content_length(header)? {
                len = Some(parsed);
            }
        }
    }
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, message: &serde_json::Value) -> Result<(), CodecError> {
        let body = serde_json::to_vec(message)?;
        let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len());
        self.writer
            .write_all(header.as_bytes())
            .await
            .map_err(io_err("writing frame header"))?;
        self.writer
            .write_all(&body)
            .await
            .map_err(io_err("writing frame body"))?;
        self.writer
            .flush()
            .await
            .map_err(io_err("flushing frame"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_one(bytes: &[u8]) -> Result<Option<serde_json::Value>, CodecError> {
        FrameReader::new(bytes).read_frame().await
    }

    #[tokio::test]
    async fn written_frames_read_back_in_order() {
        let first = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"});
        let second = serde_json::json!({"jsonrpc": "2.0", "method": "initialized"});

        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        writer.write_frame(&first).await.unwrap();
        writer.write_frame(&second).await.unwrap();

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(reader.read_frame().await.unwrap(), Some(first));
        assert_eq!(reader.read_frame().await.unwrap(), Some(second));
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn length_counts_bytes_not_chars() {
        let body = r#"{"message":"spaCy ✓"}"#;
        let frame = format!("Content-Length: {}\r\n\r\n{body}", body.len());
        let value = read_one(frame.as_bytes()).await.unwrap().unwrap();
        assert_eq!(value["message"], "spaCy ✓");
    }

    #[tokio::test]
    async fn header_name_is_case_insensitive_and_extras_ignored() {
        let body = r#"{"id":7}"#;
        let frame = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: {}\r\n\r\n{body}",
            body.len()
        );
        let value = read_one(frame.as_bytes()).await.unwrap().unwrap();
        assert_eq!(value["id"], 7);
    }

    #[tokio::test]
    async fn eof_inside_headers_is_an_error() {
        assert!(matches!(
            read_one(b"Content-Length: 10\r\n").await,
            Err(CodecError::TruncatedHeaders)
        ));
    }

    #[tokio::test]
    async fn missing_length_is_an_error() {
        assert!(matches!(
            read_one(b"Content-Type: application/json\r\n\r\n{}").await,
            Err(CodecError::MissingLength)
        ));
    }

    #[tokio::test]
    async fn bad_and_oversized_lengths_are_rejected() {
        assert!(matches!(
            read_one(b"Content-Length: lots\r\n\r\n").await,
            Err(CodecError::BadLength(_))
        ));
        let huge = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        assert!(matches!(
            read_one(huge.as_bytes()).await,
            Err(CodecError::TooLarge(_))
        ));
    }

    #[tokio::test]
    async fn short_body_and_bad_json_are_errors() {
        assert!(matches!(
            read_one(b"Content-Length: 100\r\n\r\n{}").await,
            Err(CodecError::Io { .. })
        ));
        assert!(matches!(
            read_one(b"Content-Length: 5\r\n\r\nnope!").await,
            Err(CodecError::Json(_))
        ));
    }
}
