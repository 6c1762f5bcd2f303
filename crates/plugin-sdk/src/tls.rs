//! Mutual TLS with the host.
//!
//! Both sides generate a throwaway self-signed certificate. The host passes its certificate in
//! `PLUGIN_CLIENT_CERT` and learns ours from the handshake line, so each side trusts exactly one
//! certificate: the one it was handed.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, PKCS_ECDSA_P256_SHA256,
};
use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{
    CertificateError, DigitallySignedStruct, DistinguishedName, ServerConfig, SignatureScheme,
};
use time::OffsetDateTime;
use tokio_rustls::TlsAcceptor;

use crate::error::{ServeError, ServeResult};

const CERT_HOST: &str = "localhost";
const CERT_ORGANIZATION: &str = "tfplugin";
/// About thirty years, hosts never rotate plugin certificates
const CERT_LIFETIME_HOURS: i64 = 262_980;

/// The server half of the mutual TLS setup
pub struct ServerIdentity {
    pub cert: CertificateDer<'static>,
    pub key: PrivateKeyDer<'static>,
}

impl ServerIdentity {
    /// Generates an ephemeral ECDSA P-256 certificate for `localhost`, usable for both client
    /// and server auth
    pub fn generate() -> ServeResult<Self> {
        let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?;

        let mut params = CertificateParams::new(vec![CERT_HOST.to_string()])?;
        params.distinguished_name.push(DnType::CommonName, CERT_HOST);
        params
            .distinguished_name
            .push(DnType::OrganizationName, CERT_ORGANIZATION);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::KeyCertSign,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];
        let now = OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::seconds(30);
        params.not_after = now + time::Duration::hours(CERT_LIFETIME_HOURS);

        let cert = params.self_signed(&key_pair)?;
        Ok(Self {
            cert: cert.der().clone(),
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
        })
    }

    /// The certificate as advertised in the handshake line
    pub fn handshake_encoding(&self) -> String {
        STANDARD_NO_PAD.encode(self.cert.as_ref())
    }
}

/// Parses the first certificate out of the PEM the host put in `PLUGIN_CLIENT_CERT`
pub fn parse_client_certificate(pem: &str) -> ServeResult<CertificateDer<'static>> {
    rustls_pemfile::certs(&mut pem.as_bytes())
        .next()
        .ok_or_else(|| ServeError::ClientCertificate("no certificate found in PEM".to_string()))?
        .map_err(|e| ServeError::ClientCertificate(e.to_string()))
}

/// Builds an acceptor that presents `identity` and only admits a client presenting
/// `client_cert`. The host speaks gRPC, so `h2` is the only ALPN protocol offered.
pub fn acceptor(
    identity: ServerIdentity,
    client_cert: CertificateDer<'static>,
) -> ServeResult<TlsAcceptor> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = PinnedClientCert {
        expected: client_cert,
        algorithms: provider.signature_verification_algorithms,
    };
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(Arc::new(verifier))
        .with_single_cert(vec![identity.cert], identity.key)?;
    config.alpn_protocols = vec![b"h2".to_vec()];
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Accepts exactly one client certificate.
///
/// The host's certificate is a self-signed CA presented as an end entity, which path
/// validation rejects, so the certificate is compared byte for byte instead. Possession of the
/// private key is still proven through the handshake signature.
#[derive(Debug)]
struct PinnedClientCert {
    expected: CertificateDer<'static>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl ClientCertVerifier for PinnedClientCert {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.expected.as_ref() {
            Ok(ClientCertVerified::assertion())
        } else {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::UnknownIssuer,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
