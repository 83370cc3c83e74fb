//! Named TLS configurations.
//!
//! The registry is process-wide. `none`, `server` and `server-strict`
//! are built in; any other mode name (`custom` by convention) must have
//! been registered through [`register_tls_config`] before the first
//! connect. Entries are insert-only: registering an existing name again
//! is rejected rather than mutated.
use std::{
    collections::HashMap,
    sync::{Arc, LazyLock, Mutex},
};

use rustls::{
    ClientConfig, DigitallySignedStruct, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::CryptoProvider,
    pki_types::{CertificateDer, ServerName, UnixTime},
};

static REGISTRY: LazyLock<Mutex<HashMap<String, Arc<ClientConfig>>>> =
    LazyLock::new(Default::default);

/// Register a TLS configuration under `name` for use as a `tlsmode`
/// connection string value.
///
/// Returns `false` when the name is reserved or already taken.
pub fn register_tls_config(name: impl Into<String>, config: Arc<ClientConfig>) -> bool {
    let name = name.into();
    if matches!(name.as_str(), "none" | "server" | "server-strict") {
        return false;
    }
    let mut registry = REGISTRY.lock().unwrap();
    if registry.contains_key(&name) {
        return false;
    }
    registry.insert(name, config);
    true
}

/// Resolve a `tlsmode` name to a client configuration.
///
/// `None` is returned only for unknown names; the `none` mode is decided
/// before lookup by the connection.
pub(crate) fn client_config(mode: &str) -> Option<Arc<ClientConfig>> {
    match mode {
        "server" => Some(SERVER.clone()),
        "server-strict" => Some(SERVER_STRICT.clone()),
        name => REGISTRY.lock().unwrap().get(name).cloned(),
    }
}

/// `server` mode: encrypt without verifying the peer certificate.
static SERVER: LazyLock<Arc<ClientConfig>> = LazyLock::new(|| {
    let provider = rustls::crypto::ring::default_provider();
    let config = ClientConfig::builder_with_provider(provider.clone().into())
        .with_safe_default_protocol_versions()
        .expect("ring provider supports default protocol versions")
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert { provider }))
        .with_no_client_auth();
    Arc::new(config)
});

/// `server-strict` mode: verify the certificate chain against the
/// bundled web roots and check the host name.
static SERVER_STRICT: LazyLock<Arc<ClientConfig>> = LazyLock::new(|| {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = rustls::crypto::ring::default_provider();
    let config = ClientConfig::builder_with_provider(provider.into())
        .with_safe_default_protocol_versions()
        .expect("ring provider supports default protocol versions")
        .with_root_certificates(roots)
        .with_no_client_auth();
    Arc::new(config)
});

/// Certificate verifier that trusts any presented chain.
///
/// Signatures are still checked so an active session cannot be tampered
/// with; only the identity binding is skipped.
#[derive(Debug)]
struct AcceptAnyCert {
    provider: CryptoProvider,
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builtin_modes_resolve() {
        assert!(client_config("server").is_some());
        assert!(client_config("server-strict").is_some());
        assert!(client_config("nonexistent-registered-mode").is_none());
    }

    #[test]
    fn registration_is_insert_only() {
        assert!(!register_tls_config("server", SERVER.clone()), "reserved name");

        assert!(register_tls_config("custom-test-entry", SERVER.clone()));
        assert!(
            !register_tls_config("custom-test-entry", SERVER_STRICT.clone()),
            "existing entries must not be replaced"
        );
        assert!(client_config("custom-test-entry").is_some());
    }
}
