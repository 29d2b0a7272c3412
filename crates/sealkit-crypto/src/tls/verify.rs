//! Peer certificate verifiers for each [`VerifyMode`](super::VerifyMode).
//!
//! Handshake signatures are always checked; the mode only decides what
//! happens to the certificate chain.

use std::sync::{Arc, Mutex};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, DistinguishedName, RootCertStore, SignatureScheme};
use tracing::{debug, warn};

use super::{TlsError, VerifyResult};

/// Shared slot the verifier writes its outcome into.
pub(crate) type Outcome = Arc<Mutex<VerifyResult>>;

fn record(outcome: &Outcome, result: VerifyResult) {
    if let Ok(mut slot) = outcome.lock() {
        *slot = result;
    }
}

fn root_store(ca_chain: &[CertificateDer<'static>]) -> Result<Arc<RootCertStore>, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in ca_chain {
        roots
            .add(cert.clone())
            .map_err(|e| TlsError::Setup(format!("unusable CA certificate: {e}")))?;
    }
    Ok(Arc::new(roots))
}

/// Verifies a server certificate according to the session's mode.
#[derive(Debug)]
pub(crate) struct ServerVerifier {
    webpki: Option<Arc<WebPkiServerVerifier>>,
    algorithms: WebPkiSupportedAlgorithms,
    enforce: bool,
    // Set when validation was requested but there is nothing to anchor it.
    report_untrusted: bool,
    outcome: Outcome,
}

impl ServerVerifier {
    /// Accept any chain.
    pub(crate) fn accept_any(provider: &CryptoProvider, outcome: Outcome) -> Self {
        Self {
            webpki: None,
            algorithms: provider.signature_verification_algorithms,
            enforce: false,
            report_untrusted: false,
            outcome,
        }
    }

    /// Validate against `ca_chain`. With `enforce` unset a failed validation
    /// is recorded and the handshake continues.
    pub(crate) fn webpki(
        provider: Arc<CryptoProvider>,
        ca_chain: &[CertificateDer<'static>],
        enforce: bool,
        outcome: Outcome,
    ) -> Result<Self, TlsError> {
        let algorithms = provider.signature_verification_algorithms;
        let webpki = if ca_chain.is_empty() {
            None
        } else {
            let verifier = WebPkiServerVerifier::builder_with_provider(root_store(ca_chain)?, provider)
                .build()
                .map_err(|e| TlsError::Setup(e.to_string()))?;
            Some(verifier)
        };
        if enforce && webpki.is_none() {
            return Err(TlsError::NotConfigured("CA chain"));
        }
        Ok(Self {
            report_untrusted: webpki.is_none(),
            webpki,
            algorithms,
            enforce,
            outcome,
        })
    }
}

impl ServerCertVerifier for ServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let Some(webpki) = &self.webpki else {
            if self.report_untrusted {
                record(&self.outcome, VerifyResult::Untrusted("no CA chain configured".into()));
            }
            return Ok(ServerCertVerified::assertion());
        };

        match webpki.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now) {
            Ok(verified) => {
                debug!("server certificate trusted");
                record(&self.outcome, VerifyResult::Trusted);
                Ok(verified)
            }
            Err(e) => {
                record(&self.outcome, VerifyResult::Untrusted(e.to_string()));
                if self.enforce {
                    return Err(e);
                }
                warn!(error = %e, "server certificate not trusted, continuing");
                Ok(ServerCertVerified::assertion())
            }
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

/// Client certificate verifier for server sessions.
#[derive(Debug)]
pub(crate) struct ClientVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    enforce: bool,
    outcome: Outcome,
}

impl ClientVerifier {
    pub(crate) fn new(
        provider: Arc<CryptoProvider>,
        ca_chain: &[CertificateDer<'static>],
        enforce: bool,
        outcome: Outcome,
    ) -> Result<Self, TlsError> {
        let inner = WebPkiClientVerifier::builder_with_provider(root_store(ca_chain)?, provider)
            .allow_unauthenticated()
            .build()
            .map_err(|e| TlsError::Setup(e.to_string()))?;
        Ok(Self {
            inner,
            enforce,
            outcome,
        })
    }
}

impl ClientCertVerifier for ClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        self.enforce
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        match self.inner.verify_client_cert(end_entity, intermediates, now) {
            Ok(verified) => {
                debug!("client certificate trusted");
                record(&self.outcome, VerifyResult::Trusted);
                Ok(verified)
            }
            Err(e) => {
                record(&self.outcome, VerifyResult::Untrusted(e.to_string()));
                if self.enforce {
                    return Err(e);
                }
                warn!(error = %e, "client certificate not trusted, continuing");
                Ok(ClientCertVerified::assertion())
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
