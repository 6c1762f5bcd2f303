//! Error types for encoding, decoding and configuration

/// Errors produced while converting values or types to and from their wire representations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid type: {0}")]
    InvalidType(String),
    /// A value did not conform to the type it was decoded or encoded against
    #[error("{path}: expected {expected}, found {found}")]
    Mismatch {
        path: String,
        expected: String,
        found: String,
    },
    #[error("{path}: unsupported attribute {name:?}")]
    UnexpectedAttribute { path: String, name: String },
    #[error("{0}: unknown values cannot be serialized as JSON")]
    UnknownInJson(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("failed to decode msgpack: {0}")]
    MsgpackDecode(String),
    #[error("failed to encode msgpack: {0}")]
    MsgpackEncode(String),
}

/// Errors raised when the environment handed over by the host is malformed
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} value {value:?} is not a valid port: {source}")]
    InvalidPort {
        name: &'static str,
        value: String,
        source: std::num::ParseIntError,
    },
    #[error("PLUGIN_MIN_PORT value of {min} is greater than PLUGIN_MAX_PORT value of {max}")]
    PortRange { min: u16, max: u16 },
}
