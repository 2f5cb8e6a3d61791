//! Error types for the scheme plugin runtime.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while building registries or scanning for plugins.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Plugin directory or executable not found.
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// A service name was registered twice.
    #[error("Service already registered: {0}")]
    DuplicateService(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Failure to read one newline-terminated frame.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The peer sent more than `max` bytes without a line break.
    #[error("line exceeds {max} bytes")]
    TooLong { max: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons the handshake with a freshly spawned plugin can fail.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// The process closed stdout before announcing itself.
    #[error("plugin exited before completing the handshake (status: {status})")]
    ProcessExited { status: String },

    /// No handshake line arrived in time.
    #[error("timed out after {0:?} waiting for the handshake")]
    Timeout(Duration),

    /// The first line did not have the `CORE|APP|NETWORK|PROTOCOL` shape.
    #[error("malformed handshake line: {0:?}")]
    Malformed(String),

    #[error("incompatible core protocol version: expected {expected}, plugin speaks {actual}")]
    CoreVersionMismatch { expected: u32, actual: u32 },

    #[error("incompatible plugin protocol version: expected {expected}, plugin speaks {actual}")]
    ProtocolVersionMismatch { expected: u32, actual: u32 },

    #[error("unsupported transport: network {network:?}, protocol {protocol:?}")]
    UnsupportedTransport { network: String, protocol: String },

    #[error("I/O error during handshake: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FrameError> for HandshakeError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::TooLong { max } => {
                HandshakeError::Malformed(format!("handshake line longer than {max} bytes"))
            }
            FrameError::Io(e) => HandshakeError::Io(e),
        }
    }
}

/// Errors surfaced by calls over an established plugin connection.
#[derive(Error, Debug)]
pub enum RpcError {
    /// The plugin closed its end of the connection.
    #[error("connection to plugin closed")]
    ConnectionClosed,

    #[error("call {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// The plugin answered with an error response.
    #[error("plugin returned error [{code}]: {message}")]
    Remote { code: i64, message: String },

    /// A response line was longer than the connection accepts.
    #[error("response frame exceeds {max} bytes")]
    FrameTooLarge { max: usize },

    /// The plugin answered a request that was never sent.
    #[error("unexpected response id {actual} (waiting for {expected})")]
    UnexpectedResponse { expected: u64, actual: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<FrameError> for RpcError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::TooLong { max } => RpcError::FrameTooLarge { max },
            FrameError::Io(e) => RpcError::Io(e),
        }
    }
}

impl RpcError {
    /// True when the failure means the plugin process is gone or unreachable.
    pub fn is_connection_error(&self) -> bool {
        match self {
            RpcError::ConnectionClosed => true,
            RpcError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
