//! Handshake descriptor and the one-line negotiation that precedes any RPC.
//!
//! The host passes the magic cookie to the child through its environment.
//! A plugin that does not find the expected cookie refuses to run; one that
//! does replies with a single line on stdout:
//!
//! ```text
//! CORE-PROTOCOL-VERSION|APP-PROTOCOL-VERSION|NETWORK|PROTOCOL
//! ```
//!
//! The cookie is a guard against launching arbitrary executables, not an
//! authentication mechanism.

use crate::error::HandshakeError;
use std::fmt;
use std::str::FromStr;

/// Version of the line/frame transport implemented by this crate.
pub const CORE_PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the protocol version the host speaks.
pub const PROTOCOL_VERSIONS_ENV: &str = "PLUGIN_PROTOCOL_VERSIONS";

/// The only network supported: the child's stdin/stdout.
pub const NETWORK_STDIO: &str = "stdio";

/// The only framing supported: newline-delimited JSON-RPC.
pub const PROTOCOL_JSONRPC: &str = "jsonrpc";

/// Handshake values compiled into the host and every valid plugin build.
pub const HANDSHAKE: HandshakeConfig = HandshakeConfig {
    protocol_version: 1,
    magic_cookie_key: "VERAISON_PLUGIN",
    magic_cookie_value: "VERAISON",
};

/// Compile-time compatibility tag shared between host and plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Must match exactly; there is no version range negotiation.
    pub protocol_version: u32,
    pub magic_cookie_key: &'static str,
    pub magic_cookie_value: &'static str,
}

impl HandshakeConfig {
    /// Environment the host adds to the child command.
    pub fn child_env(&self) -> [(&'static str, String); 2] {
        [
            (self.magic_cookie_key, self.magic_cookie_value.to_string()),
            (PROTOCOL_VERSIONS_ENV, self.protocol_version.to_string()),
        ]
    }

    /// Whether a cookie value read from the environment matches.
    pub fn cookie_matches(&self, value: Option<&str>) -> bool {
        value == Some(self.magic_cookie_value)
    }

    /// The line a plugin built with this config announces on stdout.
    pub fn announce(&self) -> HandshakeLine {
        HandshakeLine {
            core_version: CORE_PROTOCOL_VERSION,
            protocol_version: self.protocol_version,
            network: NETWORK_STDIO.to_string(),
            protocol: PROTOCOL_JSONRPC.to_string(),
        }
    }

    /// Validate a line received from a plugin against this config.
    pub fn verify(&self, line: &HandshakeLine) -> Result<(), HandshakeError> {
        if line.core_version != CORE_PROTOCOL_VERSION {
            return Err(HandshakeError::CoreVersionMismatch {
                expected: CORE_PROTOCOL_VERSION,
                actual: line.core_version,
            });
        }
        if line.protocol_version != self.protocol_version {
            return Err(HandshakeError::ProtocolVersionMismatch {
                expected: self.protocol_version,
                actual: line.protocol_version,
            });
        }
        if line.network != NETWORK_STDIO || line.protocol != PROTOCOL_JSONRPC {
            return Err(HandshakeError::UnsupportedTransport {
                network: line.network.clone(),
                protocol: line.protocol.clone(),
            });
        }
        Ok(())
    }
}

/// Parsed form of the handshake line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeLine {
    pub core_version: u32,
    pub protocol_version: u32,
    pub network: String,
    pub protocol: String,
}

impl FromStr for HandshakeLine {
    type Err = HandshakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parts: Vec<&str> = trimmed.split('|').collect();
        if parts.len() != 4 {
            return Err(HandshakeError::Malformed(trimmed.to_string()));
        }

        let version = |field: &str| {
            field
                .parse::<u32>()
                .map_err(|_| HandshakeError::Malformed(trimmed.to_string()))
        };

        Ok(Self {
            core_version: version(parts[0])?,
            protocol_version: version(parts[1])?,
            network: parts[2].to_string(),
            protocol: parts[3].to_string(),
        })
    }
}

impl fmt::Display for HandshakeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.core_version, self.protocol_version, self.network, self.protocol
        )
    }
}
