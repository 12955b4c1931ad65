//! Framed, concurrency-safe transport over an abstract byte-stream pair
//! (§4.1 of the spec).
//!
//! [`Transport`] turns a `(AsyncRead, AsyncWrite)` pair into a sequence of
//! whole message byte slices. Two wire dialects are supported, selected at
//! construction via [`Dialect`]:
//!
//! - [`Dialect::LineDelimited`] -- one JSON value per `\n`-terminated line.
//! - [`Dialect::HeaderFramed`] -- RFC822-style headers (`Content-Length`)
//!   followed by an exact-length body, with a tolerant direct-JSON fallback
//!   on input.
//!
//! Reads are single-owner (the connection scheduler); writes are serialized
//! under an internal mutex so concurrent writers never interleave partial
//! frames (§5 "Shared-resource policy").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::RichError;

/// One JSON value per line, `\n`-terminated. Maximum single message: 1 MiB.
pub const LINE_MAX_MESSAGE_BYTES: u64 = 1024 * 1024;

/// `Content-Length`-prefixed body. Maximum declared length: 100 MiB.
pub const HEADER_MAX_MESSAGE_BYTES: u64 = 100 * 1024 * 1024;

/// How many bytes of an oversized message are retained as a diagnostic
/// preview in the `MessageTooLarge` error context.
const PREVIEW_BYTES: usize = 100;

/// The default per-operation read/write deadline when the caller does not
/// override it.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// The wire dialect a [`Transport`] speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// One JSON value per line; see module docs.
    LineDelimited,
    /// `Content-Length` header framing with direct-JSON input fallback.
    HeaderFramed,
}

/// The outcome of a single [`Transport::read`] call.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete message, framing stripped.
    Message(Vec<u8>),
    /// The peer closed the stream cleanly at a message boundary.
    EndOfStream,
}

fn io_to_rich(e: std::io::Error) -> RichError {
    RichError::parse_error(format!("transport I/O error: {e}"))
}

fn preview(bytes: &[u8]) -> String {
    let n = bytes.len().min(PREVIEW_BYTES);
    String::from_utf8_lossy(&bytes[..n]).into_owned()
}

fn closed_error() -> RichError {
    RichError::internal("transport is closed").with_property("reason", serde_json::json!("closed"))
}

/// Framed transport over any `AsyncRead`/`AsyncWrite` byte-stream pair.
///
/// Construct with [`Transport::new`], passing the dialect to speak. Reads
/// must be driven by a single caller (the owning `Connection`); writes may
/// be called concurrently and are serialized internally.
pub struct Transport<R, W> {
    reader: BufReader<R>,
    writer: Arc<Mutex<W>>,
    dialect: Dialect,
    read_deadline: Duration,
    write_deadline: Duration,
    closed: Arc<AtomicBool>,
}

impl<R, W> Transport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, dialect: Dialect) -> Self {
        Self::with_deadlines(reader, writer, dialect, DEFAULT_DEADLINE, DEFAULT_DEADLINE)
    }

    pub fn with_deadlines(
        reader: R,
        writer: W,
        dialect: Dialect,
        read_deadline: Duration,
        write_deadline: Duration,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(writer)),
            dialect,
            read_deadline,
            write_deadline,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Read one complete message. Blocks until a message arrives, the peer
    /// closes at a boundary (`EndOfStream`), `cancel` fires, or the read
    /// deadline elapses (`TimeoutError`).
    ///
    /// Never returns a partial message: on deadline expiry any bytes already
    /// consumed from the underlying stream for the in-progress frame are
    /// discarded, and the next call starts framing fresh (§4.1 "Detail on
    /// reads").
    pub async fn read(&mut self, cancel: &CancellationToken) -> Result<ReadOutcome, RichError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(
                RichError::internal("read cancelled").with_property("reason", serde_json::json!("cancelled"))
            ),
            outcome = tokio::time::timeout(self.read_deadline, self.read_one_frame()) => {
                match outcome {
                    Ok(result) => result,
                    Err(_elapsed) => Err(RichError::new(
                        crate::error::ErrorKind::TimeoutError,
                        crate::error::ErrorCategory::Rpc,
                        "transport read deadline elapsed",
                    )
                    .with_property("timeout_seconds", serde_json::json!(self.read_deadline.as_secs_f64()))),
                }
            }
        }
    }

    async fn read_one_frame(&mut self) -> Result<ReadOutcome, RichError> {
        match self.dialect {
            Dialect::LineDelimited => self.read_line_delimited().await,
            Dialect::HeaderFramed => self.read_header_framed().await,
        }
    }

    async fn read_line_delimited(&mut self) -> Result<ReadOutcome, RichError> {
        let mut buf = Vec::new();
        loop {
            let available = self.reader.fill_buf().await.map_err(io_to_rich)?;
            if available.is_empty() {
                return if buf.is_empty() {
                    Ok(ReadOutcome::EndOfStream)
                } else {
                    Err(RichError::parse_error(
                        "end of stream mid-message (line-delimited)",
                    ))
                };
            }
            if let Some(pos) = available.iter().position(|&b| b == b'\n') {
                buf.extend_from_slice(&available[..pos]);
                self.reader.consume(pos + 1);
                break;
            }
            buf.extend_from_slice(available);
            let n = available.len();
            self.reader.consume(n);
            if buf.len() as u64 > LINE_MAX_MESSAGE_BYTES {
                return Err(RichError::parse_error("message exceeds 1 MiB line-delimited limit")
                    .with_property("preview", serde_json::json!(preview(&buf)))
                    .with_property("limit_bytes", serde_json::json!(LINE_MAX_MESSAGE_BYTES)));
            }
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        Ok(ReadOutcome::Message(buf))
    }

    async fn read_header_framed(&mut self) -> Result<ReadOutcome, RichError> {
        loop {
            let available = self.reader.fill_buf().await.map_err(io_to_rich)?;
            if available.is_empty() {
                return Ok(ReadOutcome::EndOfStream);
            }
            if available[0].is_ascii_whitespace() {
                self.reader.consume(1);
                continue;
            }
            break;
        }

        let first_byte = self.reader.fill_buf().await.map_err(io_to_rich)?[0];
        if first_byte == b'{' {
            return self.read_direct_json().await;
        }

        let mut content_length: Option<u64> = None;
        loop {
            let mut line = Vec::new();
            let n = self
                .reader
                .read_until(b'\n', &mut line)
                .await
                .map_err(io_to_rich)?;
            if n == 0 {
                return Err(RichError::parse_error("end of stream mid-header"));
            }
            while matches!(line.last(), Some(&b'\n') | Some(&b'\r')) {
                line.pop();
            }
            if line.is_empty() {
                break;
            }
            let line_str = String::from_utf8_lossy(&line);
            if let Some((name, value)) = line_str.split_once(':') {
                if name.trim().eq_ignore_ascii_case("content-length") {
                    let value = value.trim();
                    let parsed: i64 = value.parse().map_err(|_| {
                        RichError::parse_error(format!("malformed Content-Length header: {value}"))
                            .with_property("header_state", serde_json::json!("malformed"))
                    })?;
                    if parsed < 0 {
                        return Err(RichError::parse_error("Content-Length must be non-negative")
                            .with_property("header_state", serde_json::json!("nonpositive")));
                    }
                    content_length = Some(parsed as u64);
                }
            }
        }

        let content_length = content_length.ok_or_else(|| {
            RichError::parse_error("missing Content-Length header")
                .with_property("header_state", serde_json::json!("missing"))
        })?;

        if content_length > HEADER_MAX_MESSAGE_BYTES {
            return Err(RichError::parse_error("Content-Length exceeds 100 MiB ceiling")
                .with_property("declared_bytes", serde_json::json!(content_length))
                .with_property("limit_bytes", serde_json::json!(HEADER_MAX_MESSAGE_BYTES)));
        }

        let mut body = vec![0u8; content_length as usize];
        self.reader.read_exact(&mut body).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                RichError::parse_error("body shorter than declared Content-Length")
            } else {
                io_to_rich(e)
            }
        })?;
        Ok(ReadOutcome::Message(body))
    }

    /// Tolerant direct-JSON fallback: balanced-brace counting over a
    /// top-level `{ ... }` value, with string/escape tracking so braces
    /// inside string literals don't affect depth.
    async fn read_direct_json(&mut self) -> Result<ReadOutcome, RichError> {
        let mut buf = Vec::new();
        let mut depth: i64 = 0;
        let mut in_string = false;
        let mut escaped = false;
        let mut started = false;
        loop {
            let available = self.reader.fill_buf().await.map_err(io_to_rich)?;
            if available.is_empty() {
                return Err(RichError::parse_error("end of stream mid-body (direct JSON fallback)"));
            }
            let mut consumed = 0usize;
            let mut done = false;
            for &b in available {
                consumed += 1;
                buf.push(b);
                if buf.len() as u64 > HEADER_MAX_MESSAGE_BYTES {
                    self.reader.consume(consumed);
                    return Err(RichError::parse_error("direct JSON message exceeds 100 MiB ceiling"));
                }
                if in_string {
                    if escaped {
                        escaped = false;
                    } else if b == b'\\' {
                        escaped = true;
                    } else if b == b'"' {
                        in_string = false;
                    }
                    continue;
                }
                match b {
                    b'"' => in_string = true,
                    b'{' => {
                        depth += 1;
                        started = true;
                    }
                    b'}' => depth -= 1,
                    _ => {}
                }
                if started && depth == 0 {
                    done = true;
                    break;
                }
            }
            self.reader.consume(consumed);
            if done {
                return Ok(ReadOutcome::Message(buf));
            }
        }
    }

    /// Write one complete message atomically with respect to other writers
    /// on the same transport.
    pub async fn write(&self, bytes: &[u8], cancel: &CancellationToken) -> Result<(), RichError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(
                RichError::internal("write cancelled").with_property("reason", serde_json::json!("cancelled"))
            ),
            outcome = tokio::time::timeout(self.write_deadline, self.write_frame(bytes)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_elapsed) => Err(RichError::new(
                        crate::error::ErrorKind::TimeoutError,
                        crate::error::ErrorCategory::Rpc,
                        "transport write deadline elapsed",
                    )),
                }
            }
        }
    }

    async fn write_frame(&self, bytes: &[u8]) -> Result<(), RichError> {
        let mut writer = self.writer.lock().await;
        match self.dialect {
            Dialect::LineDelimited => {
                writer.write_all(bytes).await.map_err(io_to_rich)?;
                writer.write_all(b"\n").await.map_err(io_to_rich)?;
            }
            Dialect::HeaderFramed => {
                let header = format!("Content-Length: {}\r\n\r\n", bytes.len());
                writer.write_all(header.as_bytes()).await.map_err(io_to_rich)?;
                writer.write_all(bytes).await.map_err(io_to_rich)?;
            }
        }
        writer.flush().await.map_err(io_to_rich)
    }

    /// Idempotent. Unblocks any outstanding read/write with a
    /// closed-transport error.
    pub async fn close(&self) -> Result<(), RichError> {
        self.closed.store(true, Ordering::Release);
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        Ok(())
    }
}
