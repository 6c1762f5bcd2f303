//! The line a plugin prints on stdout to tell its host where to connect

use core::fmt;
use core::str::FromStr;

use tracing::warn;

/// Version of the handshake line format itself
pub const CORE_PROTOCOL_VERSION: u32 = 1;

/// App protocol versions served by this runtime, oldest first
pub const SUPPORTED_PROTOCOL_VERSIONS: &[u32] = &[6];

/// Value the host sets in `TF_PLUGIN_MAGIC_COOKIE` when it launches a plugin
pub const MAGIC_COOKIE_VALUE: &str =
    "d602bf8f470bc67ca7faa0386276bbdd4330efaf76d1a219cb4d6991ca9872b2";

/// Printed to stderr when the binary is started by something other than its host
pub const NOT_LAUNCHED_BY_HOST_MESSAGE: &str = "\
This binary is a plugin. These are not meant to be executed directly.
Please execute the program that consumes these plugins, which will
load any plugins automatically";

/// Only gRPC is supported as the RPC protocol
pub const RPC_PROTOCOL: &str = "grpc";

/// Selects the app protocol version to serve.
///
/// Server versions are tried newest first and the first one the host also offered wins. When
/// nothing matches the lowest server version is returned so the host can report the mismatch.
pub fn negotiate_protocol_version(client_versions: &[u32], server_versions: &[u32]) -> u32 {
    let mut server_versions = server_versions.to_vec();
    server_versions.sort_unstable();
    for version in server_versions.iter().rev() {
        if client_versions.contains(version) {
            return *version;
        }
    }
    warn!(
        ?client_versions,
        ?server_versions,
        "host offered no supported protocol version"
    );
    server_versions.first().copied().unwrap_or_default()
}

/// A parsed or to-be-printed handshake line:
/// `CORE-VERSION|APP-VERSION|NETWORK|ADDRESS|PROTOCOL|SERVER-CERT`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub core_version: u32,
    pub app_version: u32,
    /// `unix` or `tcp`
    pub network: String,
    pub address: String,
    pub protocol: String,
    /// Base64 (standard alphabet, no padding) DER of the server certificate, empty without TLS
    pub server_cert: String,
}

impl Handshake {
    pub fn new(app_version: u32, network: &str, address: impl Into<String>) -> Self {
        Self {
            core_version: CORE_PROTOCOL_VERSION,
            app_version,
            network: network.to_string(),
            address: address.into(),
            protocol: RPC_PROTOCOL.to_string(),
            server_cert: String::new(),
        }
    }

    #[must_use]
    pub fn with_server_cert(mut self, server_cert: impl Into<String>) -> Self {
        self.server_cert = server_cert.into();
        self
    }
}

impl fmt::Display for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}|{}",
            self.core_version,
            self.app_version,
            self.network,
            self.address,
            self.protocol,
            self.server_cert
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid handshake line {line:?}: {reason}")]
pub struct HandshakeParseError {
    line: String,
    reason: &'static str,
}

impl FromStr for Handshake {
    type Err = HandshakeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim_end_matches(['\r', '\n']);
        let err = |reason| HandshakeParseError {
            line: line.to_string(),
            reason,
        };
        let parts: Vec<&str> = line.split('|').collect();
        if !(4..=6).contains(&parts.len()) {
            return Err(err("expected between 4 and 6 fields"));
        }
        let core_version = parts[0]
            .parse()
            .map_err(|_| err("core version is not a number"))?;
        let app_version = parts[1]
            .parse()
            .map_err(|_| err("app version is not a number"))?;
        Ok(Self {
            core_version,
            app_version,
            network: parts[2].to_string(),
            address: parts[3].to_string(),
            // older plugins omit the protocol, which then means net/rpc
            protocol: parts.get(4).unwrap_or(&"netrpc").to_string(),
            server_cert: parts.get(5).unwrap_or(&"").to_string(),
        })
    }
}
