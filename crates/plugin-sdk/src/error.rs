//! Error types for serving a provider plugin

use tfplugin_core::ConfigError;

pub type ServeResult<T> = Result<T, ServeError>;

/// All errors that can stop a plugin from serving, primarily from internal runtime code.
/// Failures inside provider operations are never reported here, they travel back to the host as
/// diagnostics.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServeError {
    /// The environment set by the host could not be parsed
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Debug mode needs a provider address to print reattach configuration for
    #[error("a provider address is required to serve in debug mode")]
    MissingProviderAddress,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// No listener could be bound for the host to connect to
    #[error("failed to bind plugin listener: {0}")]
    Bind(String),
    /// The server side TLS configuration was rejected
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
    /// The ephemeral server certificate could not be generated
    #[error("failed to generate server certificate: {0}")]
    Certificate(#[from] rcgen::Error),
    /// The certificate the host sent does not contain a usable certificate
    #[error("invalid client certificate: {0}")]
    ClientCertificate(String),
    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),
}
