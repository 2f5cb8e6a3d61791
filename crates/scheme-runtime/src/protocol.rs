//! Newline-delimited JSON-RPC framing over a plugin's stdio.
//!
//! Every frame is one JSON object on one line. Requests carry a numeric id
//! that the plugin echoes in its response. Only one request is in flight per
//! connection; callers serialize access.

use crate::error::{FrameError, HandshakeError, RpcError};
use crate::handshake::{HandshakeConfig, HandshakeLine};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

/// Method used to request a named service from the plugin.
pub const DISPENSE_METHOD: &str = "plugin.dispense";

/// Generic failure inside a service implementation.
pub const SERVICE_ERROR: i64 = -32000;
/// The requested service is not offered by this plugin.
pub const SERVICE_NOT_OFFERED: i64 = -32001;
pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

/// Longest handshake line accepted, newline excluded.
pub const MAX_HANDSHAKE_LINE: usize = 1024;
/// Longest frame accepted on a connection, newline excluded.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// A response frame: exactly one of `result` or `error` is meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Params of [`DISPENSE_METHOD`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispenseRequest {
    pub service: String,
}

/// Result of [`DISPENSE_METHOD`]: the methods the dispensed object answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispenseReply {
    pub service: String,
    pub methods: Vec<String>,
}

/// Wire name of a method on a dispensed service.
pub fn service_method(service: &str, method: &str) -> String {
    format!("{service}.{method}")
}

/// Newline-delimited reader that refuses lines longer than a cap.
///
/// Bytes of a partially read line are kept across calls, so dropping a
/// [`next_frame`](Self::next_frame) future (on timeout, say) loses nothing.
/// After an overlong line the remainder of that line is skipped.
pub struct LineReader<R> {
    inner: BufReader<R>,
    pending: Vec<u8>,
    max_len: usize,
    discarding: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            pending: Vec::new(),
            max_len,
            discarding: false,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Next line without its terminator, or `None` at EOF.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        self.next_frame_within(self.max_len).await
    }

    /// Like [`next_frame`](Self::next_frame) with a tighter cap for this line.
    pub async fn next_frame_within(
        &mut self,
        max_len: usize,
    ) -> Result<Option<Vec<u8>>, FrameError> {
        loop {
            let budget = max_len.saturating_add(1).saturating_sub(self.pending.len()) as u64;
            let read = (&mut self.inner)
                .take(budget)
                .read_until(b'\n', &mut self.pending)
                .await?;
            let complete = self.pending.last() == Some(&b'\n');

            if self.discarding {
                self.pending.clear();
                if complete {
                    self.discarding = false;
                }
                if read == 0 {
                    return Ok(None);
                }
                continue;
            }

            if complete {
                let mut line = std::mem::take(&mut self.pending);
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }

            if self.pending.len() > max_len {
                self.pending.clear();
                self.discarding = true;
                return Err(FrameError::TooLong { max: max_len });
            }

            if read == 0 {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.pending)));
            }
        }
    }
}

/// Read and validate the handshake line, the first thing a plugin writes.
pub async fn read_handshake<R>(
    reader: &mut LineReader<R>,
    config: &HandshakeConfig,
    timeout: Duration,
) -> Result<HandshakeLine, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let frame = tokio::time::timeout(timeout, reader.next_frame_within(MAX_HANDSHAKE_LINE))
        .await
        .map_err(|_| HandshakeError::Timeout(timeout))??;
    let Some(frame) = frame else {
        return Err(HandshakeError::ProcessExited {
            status: "unknown".to_string(),
        });
    };
    let raw = String::from_utf8(frame)
        .map_err(|_| HandshakeError::Malformed("handshake line is not UTF-8".to_string()))?;

    debug!(line = %raw.trim(), "Received handshake line");
    let line: HandshakeLine = raw.parse()?;
    config.verify(&line)?;
    Ok(line)
}

/// Host side of a plugin connection.
pub struct RpcConnection<R, W> {
    reader: LineReader<R>,
    writer: W,
    next_id: u64,
    // A request was cut off mid-write; the peer's framing is lost.
    torn: bool,
}

impl<R, W> RpcConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap a raw reader/writer pair.
    pub fn new(reader: R, writer: W) -> Self {
        Self::from_reader(LineReader::new(reader, MAX_FRAME_LEN), writer)
    }

    /// Continue on a line reader that has already consumed the handshake.
    pub fn from_reader(reader: LineReader<R>, writer: W) -> Self {
        Self {
            reader,
            writer,
            next_id: 1,
            torn: false,
        }
    }

    /// Send a request and wait for its response.
    ///
    /// `timeout` bounds the whole exchange, writing included.
    pub async fn call(
        &mut self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        if self.torn {
            return Err(RpcError::ConnectionClosed);
        }

        let id = self.next_id;
        self.next_id += 1;

        let request = RpcRequest {
            id,
            method: method.to_string(),
            params,
        };
        let mut frame = serde_json::to_vec(&request)?;
        frame.push(b'\n');
        trace!(id, method, "Sending request");

        match tokio::time::timeout(timeout, self.exchange(id, &frame)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout {
                method: method.to_string(),
                timeout,
            }),
        }
    }

    /// Typed variant of [`call`](Self::call).
    pub async fn call_typed<P, T>(
        &mut self,
        method: &str,
        params: &P,
        timeout: Duration,
    ) -> Result<T, RpcError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let value = self.call(method, params, timeout).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn exchange(&mut self, id: u64, frame: &[u8]) -> Result<Value, RpcError> {
        self.torn = true;
        self.writer.write_all(frame).await?;
        self.writer.flush().await?;
        self.torn = false;
        self.read_response(id).await
    }

    async fn read_response(&mut self, id: u64) -> Result<Value, RpcError> {
        loop {
            let line = self
                .reader
                .next_frame()
                .await?
                .ok_or(RpcError::ConnectionClosed)?;

            let response: RpcResponse = serde_json::from_slice(&line)?;
            if response.id < id {
                debug!(stale = response.id, waiting = id, "Discarding stale response");
                continue;
            }
            if response.id > id {
                return Err(RpcError::UnexpectedResponse {
                    expected: id,
                    actual: response.id,
                });
            }

            if let Some(error) = response.error {
                return Err(RpcError::Remote {
                    code: error.code,
                    message: error.message,
                });
            }
            return Ok(response.result.unwrap_or(Value::Null));
        }
    }
}
