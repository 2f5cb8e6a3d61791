//! # scheme-runtime
//!
//! Transport-level runtime for out-of-process scheme plugins.
//!
//! This crate provides:
//! - The handshake descriptor shared by the host and every plugin build
//! - Handshake line negotiation over the plugin's stdout
//! - A newline-delimited JSON-RPC codec spoken over the child's stdio
//! - Method-level capability sets used to check dispensed services
//! - Discovery of plugin executables in a directory
//!
//! ## Connection lifecycle
//!
//! 1. The host spawns the plugin with the magic cookie in its environment.
//! 2. The plugin checks the cookie and prints `CORE|APP|stdio|jsonrpc`.
//! 3. The host validates the line, then exchanges JSON frames, one per line.
//!
//! Nothing is read from the plugin as application data before step 3.

pub mod capability;
pub mod discovery;
pub mod error;
pub mod handshake;
pub mod protocol;

pub use capability::{Capability, CapabilitySet};
pub use discovery::{default_plugins_dir, discover_executables, is_executable};
pub use error::{FrameError, HandshakeError, RpcError, RuntimeError, RuntimeResult};
pub use handshake::{
    HandshakeConfig, HandshakeLine, CORE_PROTOCOL_VERSION, HANDSHAKE, PROTOCOL_VERSIONS_ENV,
};
pub use protocol::{
    read_handshake, service_method, DispenseReply, DispenseRequest, LineReader, RpcConnection,
    RpcRequest, RpcResponse, DISPENSE_METHOD, MAX_FRAME_LEN,
};
