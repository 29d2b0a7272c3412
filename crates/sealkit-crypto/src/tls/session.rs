use std::fmt;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection};
use tracing::{debug, info, warn};

use super::rng::{RngScope, SESSION_RANDOM};
use super::verify::{ClientVerifier, Outcome, ServerVerifier};
use super::{Endpoint, SessionState, TlsError, VerifyMode, VerifyResult};
use crate::drbg::RandomByteSource;
use crate::transport::{Transport, TransportIo};

const DEFAULT_HOSTNAME: &str = "localhost";

/// A TLS client or server session over an owned [`Transport`].
///
/// Configuration setters are only accepted before the handshake starts. All
/// randomness the record layer asks for during a session call is drawn from
/// the bound [`RandomByteSource`].
pub struct TlsSession {
    state: SessionState,
    endpoint: Option<Endpoint>,
    verify_mode: Option<VerifyMode>,
    rng: Option<Arc<dyn RandomByteSource>>,
    transport: Option<Box<dyn Transport>>,
    hostname: String,
    ca_chain: Vec<CertificateDer<'static>>,
    own_cert: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
    conn: Option<Connection>,
    outcome: Outcome,
}

impl Default for TlsSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TlsSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Configured,
            endpoint: None,
            verify_mode: None,
            rng: None,
            transport: None,
            hostname: DEFAULT_HOSTNAME.to_string(),
            ca_chain: Vec::new(),
            own_cert: None,
            conn: None,
            outcome: Arc::new(Mutex::new(VerifyResult::Skipped)),
        }
    }

    /// Drop all protocol state and configuration, including the transport.
    pub fn reset(&mut self) {
        if self.conn.is_some() {
            debug!(state = %self.state, "resetting TLS session");
        }
        *self = Self::new();
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint
    }

    pub fn verify_mode(&self) -> Option<VerifyMode> {
        self.verify_mode
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn set_endpoint(&mut self, endpoint: Endpoint) -> Result<(), TlsError> {
        self.ensure_configurable()?;
        self.endpoint = Some(endpoint);
        Ok(())
    }

    pub fn set_verify_mode(&mut self, mode: VerifyMode) -> Result<(), TlsError> {
        self.ensure_configurable()?;
        self.verify_mode = Some(mode);
        Ok(())
    }

    pub fn set_rng(&mut self, rng: Arc<dyn RandomByteSource>) -> Result<(), TlsError> {
        self.ensure_configurable()?;
        self.rng = Some(rng);
        Ok(())
    }

    /// Bind the transport. Any previously bound transport is dropped.
    pub fn set_transport<T: Transport + 'static>(&mut self, transport: T) -> Result<(), TlsError> {
        self.ensure_configurable()?;
        self.transport = Some(Box::new(transport));
        Ok(())
    }

    /// Hand the transport back, leaving the session without one.
    pub fn take_transport(&mut self) -> Option<Box<dyn Transport>> {
        self.transport.take()
    }

    /// Name sent in SNI and checked against the server certificate.
    pub fn set_hostname(&mut self, hostname: &str) -> Result<(), TlsError> {
        self.ensure_configurable()?;
        ServerName::try_from(hostname.to_string())
            .map_err(|e| TlsError::InvalidArgument(format!("hostname {hostname:?}: {e}")))?;
        self.hostname = hostname.to_string();
        Ok(())
    }

    /// Trust anchors for peer validation. Returns the number loaded.
    pub fn set_ca_chain(&mut self, pem: &str) -> Result<usize, TlsError> {
        self.ensure_configurable()?;
        let certs = parse_certs(pem)?;
        self.ca_chain = certs;
        Ok(self.ca_chain.len())
    }

    /// Certificate chain and private key presented to the peer.
    pub fn set_own_cert(&mut self, cert_pem: &str, key_pem: &str) -> Result<(), TlsError> {
        self.ensure_configurable()?;
        let certs = parse_certs(cert_pem)?;
        let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
            .map_err(|e| TlsError::Pem(e.to_string()))?
            .ok_or_else(|| TlsError::Pem("no private key found".into()))?;
        self.own_cert = Some((certs, key));
        Ok(())
    }

    /// Run the handshake as far as the transport allows.
    ///
    /// Returns `WantRead`/`WantWrite` when a non-blocking transport has no
    /// data or no room; call again once it is ready. Any other error is fatal
    /// and closes the session.
    pub fn handshake(&mut self) -> Result<(), TlsError> {
        match self.state {
            SessionState::Established => return Ok(()),
            SessionState::Closed => return Err(TlsError::InvalidState(SessionState::Closed)),
            SessionState::Configured | SessionState::Handshaking => {}
        }

        let endpoint = self.endpoint.ok_or(TlsError::NotConfigured("endpoint"))?;
        let verify_mode = self.verify_mode.ok_or(TlsError::NotConfigured("verify mode"))?;
        let rng = self.rng.clone().ok_or(TlsError::NotConfigured("rng"))?;
        if self.transport.is_none() {
            return Err(TlsError::NotConfigured("transport"));
        }

        let _scope = RngScope::enter(rng);

        if self.conn.is_none() {
            let conn = match self.build_connection(endpoint, verify_mode) {
                Ok(conn) => conn,
                Err(e @ TlsError::NotConfigured(_)) => return Err(e),
                Err(e) => return Err(self.fail(e)),
            };
            self.conn = Some(conn);
            self.state = SessionState::Handshaking;
            debug!(?endpoint, ?verify_mode, "TLS handshake started");
        }

        let (conn, transport) = self.parts()?;
        match drive_handshake(conn, transport) {
            Ok(()) => {
                self.state = SessionState::Established;
                info!(
                    ?endpoint,
                    version = ?self.negotiated_protocol_version(),
                    suite = ?self.negotiated_cipher_suite(),
                    "TLS session established"
                );
                Ok(())
            }
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Encrypt and send `data`. Returns the number of plaintext bytes the
    /// session took.
    ///
    /// On a blocking transport that is all of `data`. When a non-blocking
    /// transport fills up, the bytes already taken stay queued as records and
    /// the short count is returned; the queue is flushed ahead of the next
    /// call. `WantWrite` means nothing was taken and the call can be repeated.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, TlsError> {
        self.ensure_established()?;
        let _scope = self.enter_rng()?;
        let (conn, transport) = self.parts()?;

        match flush(conn, transport) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(TlsError::WantWrite),
            Err(e) => return Err(TlsError::WriteFailed(e.to_string())),
        }

        let mut written = 0;
        while written < data.len() {
            let n = conn
                .writer()
                .write(&data[written..])
                .map_err(|e| TlsError::WriteFailed(e.to_string()))?;
            if n == 0 && !conn.wants_write() {
                return Err(TlsError::WriteFailed("record layer accepted no data".into()));
            }
            written += n;
            match flush(conn, transport) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    debug!(written, "transport full, records queued");
                    return if written > 0 { Ok(written) } else { Err(TlsError::WantWrite) };
                }
                Err(e) => return Err(TlsError::WriteFailed(e.to_string())),
            }
        }
        Ok(written)
    }

    /// Read up to `max_len` plaintext bytes.
    ///
    /// `None` means the peer closed the session (close notify or transport
    /// end-of-stream).
    pub fn read(&mut self, max_len: usize) -> Result<Option<Vec<u8>>, TlsError> {
        if max_len == 0 {
            return Err(TlsError::InvalidArgument("read length must be positive".into()));
        }
        self.ensure_established()?;
        let _scope = self.enter_rng()?;
        let (conn, transport) = self.parts()?;

        let mut buf = vec![0u8; max_len];
        loop {
            match conn.reader().read(&mut buf) {
                Ok(0) => {
                    debug!("peer sent close notify");
                    return Ok(None);
                }
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(Some(buf));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!("peer closed without close notify");
                    return Ok(None);
                }
                Err(e) => return Err(TlsError::ReadFailed(e.to_string())),
            }

            match conn.read_tls(&mut TransportIo(&mut *transport)) {
                Ok(0) => {
                    debug!("transport reached end of stream");
                    return Ok(None);
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(TlsError::WantRead),
                Err(e) => return Err(TlsError::ReadFailed(e.to_string())),
            }

            if let Err(e) = conn.process_new_packets() {
                let _ = flush(conn, transport);
                return Err(TlsError::ReadFailed(e.to_string()));
            }
            // Key updates and alerts produced while reading.
            match flush(conn, transport) {
                Err(e) if e.kind() != io::ErrorKind::WouldBlock => {
                    return Err(TlsError::ReadFailed(e.to_string()))
                }
                _ => {}
            }
        }
    }

    /// Bytes waiting on the transport, or 0 when there is no transport.
    pub fn bytes_available(&self) -> usize {
        self.transport
            .as_ref()
            .and_then(|t| t.bytes_available().ok())
            .unwrap_or(0)
    }

    /// Descriptor of the underlying transport, when it has one.
    pub fn fileno(&self) -> Option<i64> {
        self.transport.as_ref().and_then(|t| t.fileno())
    }

    /// Send a close notify alert and close the session.
    pub fn close_notify(&mut self) -> Result<(), TlsError> {
        match self.state {
            SessionState::Established | SessionState::Handshaking => {}
            state => return Err(TlsError::InvalidState(state)),
        }
        let _scope = self.enter_rng()?;
        let (conn, transport) = self.parts()?;

        conn.send_close_notify();
        let sent = flush(conn, transport).map_err(|e| TlsError::CloseFailed(e.to_string()));
        self.state = SessionState::Closed;
        debug!("close notify sent");
        sent
    }

    /// Drop protocol state without telling the peer.
    pub fn close(&mut self) {
        self.conn = None;
        self.state = SessionState::Closed;
    }

    /// Peer certificate validation outcome of the last handshake.
    pub fn verify_result(&self) -> VerifyResult {
        self.outcome
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|_| VerifyResult::Untrusted("verification state poisoned".into()))
    }

    pub fn negotiated_protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        self.conn.as_ref().and_then(|c| c.protocol_version())
    }

    pub fn negotiated_cipher_suite(&self) -> Option<rustls::CipherSuite> {
        self.conn
            .as_ref()
            .and_then(|c| c.negotiated_cipher_suite())
            .map(|s| s.suite())
    }

    fn ensure_configurable(&self) -> Result<(), TlsError> {
        match self.state {
            SessionState::Configured => Ok(()),
            state => Err(TlsError::InvalidState(state)),
        }
    }

    fn ensure_established(&self) -> Result<(), TlsError> {
        match self.state {
            SessionState::Established => Ok(()),
            state => Err(TlsError::InvalidState(state)),
        }
    }

    fn enter_rng(&self) -> Result<RngScope, TlsError> {
        let rng = self.rng.clone().ok_or(TlsError::NotConfigured("rng"))?;
        Ok(RngScope::enter(rng))
    }

    fn parts(&mut self) -> Result<(&mut Connection, &mut dyn Transport), TlsError> {
        let conn = self.conn.as_mut().ok_or(TlsError::InvalidState(self.state))?;
        let transport = self
            .transport
            .as_mut()
            .ok_or(TlsError::NotConfigured("transport"))?;
        Ok((conn, transport.as_mut()))
    }

    fn fail(&mut self, err: TlsError) -> TlsError {
        warn!(error = %err, "TLS session failed");
        self.conn = None;
        self.state = SessionState::Closed;
        err
    }

    fn provider() -> Arc<CryptoProvider> {
        Arc::new(CryptoProvider {
            secure_random: &SESSION_RANDOM,
            ..rustls::crypto::ring::default_provider()
        })
    }

    fn build_connection(&self, endpoint: Endpoint, verify_mode: VerifyMode) -> Result<Connection, TlsError> {
        let provider = Self::provider();
        *self.outcome.lock().map_err(|_| TlsError::Setup("verification state poisoned".into()))? =
            VerifyResult::Skipped;

        match endpoint {
            Endpoint::Client => {
                let verifier = match verify_mode {
                    VerifyMode::None => ServerVerifier::accept_any(&provider, Arc::clone(&self.outcome)),
                    VerifyMode::Optional | VerifyMode::Required => ServerVerifier::webpki(
                        Arc::clone(&provider),
                        &self.ca_chain,
                        verify_mode == VerifyMode::Required,
                        Arc::clone(&self.outcome),
                    )?,
                };

                let builder = ClientConfig::builder_with_provider(provider)
                    .with_safe_default_protocol_versions()
                    .map_err(|e| TlsError::Setup(e.to_string()))?
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(verifier));
                let config = match &self.own_cert {
                    Some((certs, key)) => builder
                        .with_client_auth_cert(certs.clone(), key.clone_key())
                        .map_err(|e| TlsError::Setup(e.to_string()))?,
                    None => builder.with_no_client_auth(),
                };

                let name = ServerName::try_from(self.hostname.clone())
                    .map_err(|e| TlsError::InvalidArgument(e.to_string()))?;
                let conn = ClientConnection::new(Arc::new(config), name)
                    .map_err(|e| TlsError::HandshakeFailed(e.to_string()))?;
                Ok(Connection::Client(conn))
            }
            Endpoint::Server => {
                let (certs, key) = self
                    .own_cert
                    .as_ref()
                    .ok_or(TlsError::NotConfigured("certificate"))?;

                let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
                    .with_safe_default_protocol_versions()
                    .map_err(|e| TlsError::Setup(e.to_string()))?;
                let builder = match verify_mode {
                    VerifyMode::Required if self.ca_chain.is_empty() => {
                        return Err(TlsError::NotConfigured("CA chain"));
                    }
                    VerifyMode::None => builder.with_no_client_auth(),
                    VerifyMode::Optional if self.ca_chain.is_empty() => builder.with_no_client_auth(),
                    VerifyMode::Optional | VerifyMode::Required => {
                        let verifier = ClientVerifier::new(
                            provider,
                            &self.ca_chain,
                            verify_mode == VerifyMode::Required,
                            Arc::clone(&self.outcome),
                        )?;
                        builder.with_client_cert_verifier(Arc::new(verifier))
                    }
                };
                let config = builder
                    .with_single_cert(certs.clone(), key.clone_key())
                    .map_err(|e| TlsError::Setup(e.to_string()))?;

                let conn = ServerConnection::new(Arc::new(config))
                    .map_err(|e| TlsError::HandshakeFailed(e.to_string()))?;
                Ok(Connection::Server(conn))
            }
        }
    }
}

impl fmt::Debug for TlsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSession")
            .field("state", &self.state)
            .field("endpoint", &self.endpoint)
            .field("verify_mode", &self.verify_mode)
            .field("hostname", &self.hostname)
            .field("has_rng", &self.rng.is_some())
            .field("has_transport", &self.transport.is_some())
            .finish()
    }
}

/// Push pending records to the transport.
fn flush(conn: &mut Connection, transport: &mut dyn Transport) -> io::Result<()> {
    while conn.wants_write() {
        if conn.write_tls(&mut TransportIo(&mut *transport))? == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
    }
    Ok(())
}

fn drive_handshake(conn: &mut Connection, transport: &mut dyn Transport) -> Result<(), TlsError> {
    loop {
        match flush(conn, transport) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(TlsError::WantWrite),
            Err(e) => return Err(TlsError::HandshakeFailed(format!("transport write: {e}"))),
        }

        if !conn.is_handshaking() {
            return Ok(());
        }

        match conn.read_tls(&mut TransportIo(&mut *transport)) {
            Ok(0) => {
                return Err(TlsError::HandshakeFailed(
                    "peer closed the connection during handshake".into(),
                ))
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(TlsError::WantRead),
            Err(e) => return Err(TlsError::HandshakeFailed(format!("transport read: {e}"))),
        }

        if let Err(e) = conn.process_new_packets() {
            // Best effort: let the peer see our alert.
            let _ = flush(conn, transport);
            return Err(TlsError::HandshakeFailed(e.to_string()));
        }
    }
}

fn parse_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Pem(e.to_string()))?;
    if certs.is_empty() {
        return Err(TlsError::Pem("no certificates found".into()));
    }
    Ok(certs)
}
