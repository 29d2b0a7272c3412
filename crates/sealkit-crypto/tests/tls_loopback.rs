//! TLS sessions talking to each other over in-memory and TCP transports.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

use sealkit_crypto::drbg::DRBG_RESEED_INTERVAL;
use sealkit_crypto::{
    Drbg, Endpoint, EntropyPool, ErrorKind, MemoryTransport, RandomByteSource, SessionState, TlsError, TlsSession,
    Transport, VerifyMode, VerifyResult,
};

const CA: &str = include_str!("fixtures/ca.pem");
const OTHER_CA: &str = include_str!("fixtures/other_ca.pem");
const SERVER_CERT: &str = include_str!("fixtures/server.pem");
const SERVER_KEY: &str = include_str!("fixtures/server.key");

/// Generators only hold a weak reference to their pool, so the pool lives
/// for the whole test binary.
fn drbg(label: &[u8]) -> Arc<dyn RandomByteSource> {
    static POOL: OnceLock<Arc<EntropyPool>> = OnceLock::new();
    let pool = POOL.get_or_init(|| Arc::new(EntropyPool::new()));
    Arc::new(Drbg::new(pool, Some(label)).unwrap())
}

/// Memory transport whose sends can be switched to would-block.
struct Gated {
    inner: MemoryTransport,
    blocked: Arc<AtomicBool>,
}

impl Transport for Gated {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.blocked.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.inner.send(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.recv(buf)
    }

    fn bytes_available(&self) -> io::Result<usize> {
        self.inner.bytes_available()
    }

    fn fileno(&self) -> Option<i64> {
        None
    }
}

/// Like `connect`, but the client's sends go through a gate.
fn connect_gated(client: &mut TlsSession, server: &mut TlsSession, blocked: bool) -> Arc<AtomicBool> {
    let gate = Arc::new(AtomicBool::new(blocked));
    let (a, b) = MemoryTransport::pair();
    client
        .set_transport(Gated {
            inner: a,
            blocked: Arc::clone(&gate),
        })
        .unwrap();
    server.set_transport(b).unwrap();
    gate
}

/// Read from `session` until `len` bytes have arrived.
fn read_exact(session: &mut TlsSession, len: usize) -> Vec<u8> {
    let mut got = Vec::new();
    while got.len() < len {
        got.extend(session.read(len - got.len()).unwrap().unwrap());
    }
    got
}

fn client(mode: VerifyMode) -> TlsSession {
    let mut s = TlsSession::new();
    s.set_endpoint(Endpoint::Client).unwrap();
    s.set_verify_mode(mode).unwrap();
    s.set_rng(drbg(b"client")).unwrap();
    s
}

fn server() -> TlsSession {
    let mut s = TlsSession::new();
    s.set_endpoint(Endpoint::Server).unwrap();
    s.set_verify_mode(VerifyMode::None).unwrap();
    s.set_rng(drbg(b"server")).unwrap();
    s.set_own_cert(SERVER_CERT, SERVER_KEY).unwrap();
    s
}

fn connect(client: &mut TlsSession, server: &mut TlsSession) {
    let (a, b) = MemoryTransport::pair();
    client.set_transport(a).unwrap();
    server.set_transport(b).unwrap();
}

fn waiting(result: &Result<(), TlsError>) -> bool {
    matches!(result, Err(e) if e.is_retryable())
}

/// Alternate both sides until neither is waiting on the other.
fn pump(client: &mut TlsSession, server: &mut TlsSession) -> (Result<(), TlsError>, Result<(), TlsError>) {
    let mut c = Err(TlsError::WantRead);
    let mut s = Err(TlsError::WantRead);
    for _ in 0..32 {
        if waiting(&c) {
            c = client.handshake();
        }
        if waiting(&s) {
            s = server.handshake();
        }
        if !waiting(&c) && !waiting(&s) {
            break;
        }
    }
    (c, s)
}

fn established_pair(mode: VerifyMode) -> (TlsSession, TlsSession) {
    let mut c = client(mode);
    let mut s = server();
    c.set_ca_chain(CA).unwrap();
    connect(&mut c, &mut s);
    let (cr, sr) = pump(&mut c, &mut s);
    cr.unwrap();
    sr.unwrap();
    (c, s)
}

#[test]
fn test_ping_and_close_notify() {
    let (mut c, mut s) = established_pair(VerifyMode::None);
    assert_eq!(c.state(), SessionState::Established);
    assert_eq!(s.state(), SessionState::Established);
    assert_eq!(c.verify_result(), VerifyResult::Skipped);
    assert!(c.negotiated_protocol_version().is_some());
    assert!(c.negotiated_cipher_suite().is_some());

    assert_eq!(c.write(b"ping").unwrap(), 4);
    assert!(s.bytes_available() > 0);
    assert_eq!(s.read(4).unwrap().as_deref(), Some(&b"ping"[..]));

    s.close_notify().unwrap();
    assert_eq!(s.state(), SessionState::Closed);
    assert_eq!(c.read(256).unwrap(), None);
}

#[test]
fn test_read_with_nothing_pending_wants_read() {
    let (mut c, _s) = established_pair(VerifyMode::None);
    let err = c.read(16).unwrap_err();
    assert_eq!(err, TlsError::WantRead);
    assert_eq!(sealkit_crypto::Error::from(err).kind(), ErrorKind::WouldBlockOnRead);
}

#[test]
fn test_read_respects_max_len() {
    let (mut c, mut s) = established_pair(VerifyMode::None);
    c.write(b"hello world").unwrap();

    let mut got = Vec::new();
    while got.len() < 11 {
        let chunk = s.read(3).unwrap().unwrap();
        assert!(chunk.len() <= 3);
        got.extend(chunk);
    }
    assert_eq!(got, b"hello world");
}

#[test]
fn test_large_write_is_delivered_whole() {
    let (mut c, mut s) = established_pair(VerifyMode::None);
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(c.write(&payload).unwrap(), payload.len());

    let mut got = Vec::with_capacity(payload.len());
    while got.len() < payload.len() {
        got.extend(s.read(16 * 1024).unwrap().unwrap());
    }
    assert_eq!(got, payload);
}

#[test]
fn test_transport_eof_reads_as_none() {
    let (mut c, mut s) = established_pair(VerifyMode::None);
    drop(s.take_transport());
    s.close();
    assert_eq!(c.read(64).unwrap(), None);
}

#[test]
fn test_required_verification_with_trusted_ca() {
    let (c, _s) = established_pair(VerifyMode::Required);
    assert_eq!(c.verify_result(), VerifyResult::Trusted);
}

#[test]
fn test_optional_verification_records_untrusted_chain() {
    let mut c = client(VerifyMode::Optional);
    let mut s = server();
    c.set_ca_chain(OTHER_CA).unwrap();
    connect(&mut c, &mut s);

    let (cr, sr) = pump(&mut c, &mut s);
    cr.unwrap();
    sr.unwrap();
    assert!(matches!(c.verify_result(), VerifyResult::Untrusted(_)));
}

#[test]
fn test_required_verification_rejects_untrusted_chain() {
    let mut c = client(VerifyMode::Required);
    let mut s = server();
    c.set_ca_chain(OTHER_CA).unwrap();
    connect(&mut c, &mut s);

    let (cr, _sr) = pump(&mut c, &mut s);
    assert!(matches!(cr, Err(TlsError::HandshakeFailed(_))));
    assert_eq!(c.state(), SessionState::Closed);
    assert!(matches!(c.verify_result(), VerifyResult::Untrusted(_)));
    assert!(matches!(c.write(b"x"), Err(TlsError::InvalidState(SessionState::Closed))));
}

#[test]
fn test_hostname_mismatch_is_rejected_when_required() {
    let mut c = client(VerifyMode::Required);
    let mut s = server();
    c.set_ca_chain(CA).unwrap();
    c.set_hostname("example.com").unwrap();
    connect(&mut c, &mut s);

    let (cr, _sr) = pump(&mut c, &mut s);
    assert!(matches!(cr, Err(TlsError::HandshakeFailed(_))));
}

#[test]
fn test_mutual_authentication() {
    let mut c = client(VerifyMode::Required);
    c.set_ca_chain(CA).unwrap();
    c.set_own_cert(SERVER_CERT, SERVER_KEY).unwrap();

    let mut s = TlsSession::new();
    s.set_endpoint(Endpoint::Server).unwrap();
    s.set_verify_mode(VerifyMode::Required).unwrap();
    s.set_rng(drbg(b"server")).unwrap();
    s.set_own_cert(SERVER_CERT, SERVER_KEY).unwrap();
    s.set_ca_chain(CA).unwrap();
    connect(&mut c, &mut s);

    let (cr, sr) = pump(&mut c, &mut s);
    cr.unwrap();
    sr.unwrap();
    assert_eq!(s.verify_result(), VerifyResult::Trusted);
    assert_eq!(c.verify_result(), VerifyResult::Trusted);
}

#[test]
fn test_server_requiring_client_cert_rejects_anonymous_client() {
    let mut c = client(VerifyMode::None);
    let mut s = TlsSession::new();
    s.set_endpoint(Endpoint::Server).unwrap();
    s.set_verify_mode(VerifyMode::Required).unwrap();
    s.set_rng(drbg(b"server")).unwrap();
    s.set_own_cert(SERVER_CERT, SERVER_KEY).unwrap();
    s.set_ca_chain(CA).unwrap();
    connect(&mut c, &mut s);

    let (_cr, sr) = pump(&mut c, &mut s);
    assert!(matches!(sr, Err(TlsError::HandshakeFailed(_))));
    assert_eq!(s.state(), SessionState::Closed);
}

#[test]
fn test_generator_outlives_reseed_interval() {
    let rng = drbg(b"long-lived");
    let mut buf = [0u8; 16];
    for _ in 0..=DRBG_RESEED_INTERVAL {
        rng.fill_random(&mut buf).unwrap();
    }
}

#[test]
fn test_handshake_wants_write_while_transport_is_full() {
    let mut c = client(VerifyMode::None);
    let mut s = server();
    let gate = connect_gated(&mut c, &mut s, true);

    assert_eq!(c.handshake(), Err(TlsError::WantWrite));
    assert_eq!(c.state(), SessionState::Handshaking);
    assert_eq!(c.handshake(), Err(TlsError::WantWrite));
    assert_eq!(s.handshake(), Err(TlsError::WantRead));

    gate.store(false, Ordering::SeqCst);
    let (cr, sr) = pump(&mut c, &mut s);
    cr.unwrap();
    sr.unwrap();
    assert_eq!(c.state(), SessionState::Established);
}

#[test]
fn test_write_on_full_transport_is_not_repeated() {
    let mut c = client(VerifyMode::None);
    let mut s = server();
    let gate = connect_gated(&mut c, &mut s, false);
    let (cr, sr) = pump(&mut c, &mut s);
    cr.unwrap();
    sr.unwrap();

    gate.store(true, Ordering::SeqCst);
    // The record is queued, so the bytes count as written.
    assert_eq!(c.write(b"ping").unwrap(), 4);
    assert_eq!(s.read(16), Err(TlsError::WantRead));

    // Queue still stuck: nothing new is taken.
    assert_eq!(c.write(b"more"), Err(TlsError::WantWrite));
    assert_eq!(c.state(), SessionState::Established);

    gate.store(false, Ordering::SeqCst);
    assert_eq!(c.write(b"more").unwrap(), 4);
    assert_eq!(read_exact(&mut s, 8), b"pingmore");
    assert_eq!(s.read(16), Err(TlsError::WantRead));
}

#[test]
fn test_tls_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut s = server();
        s.set_transport(stream).unwrap();
        s.handshake().unwrap();

        let msg = s.read(64).unwrap().unwrap();
        s.write(&msg).unwrap();
        s.close_notify().unwrap();
    });

    let mut c = client(VerifyMode::Required);
    c.set_ca_chain(CA).unwrap();
    c.set_transport(TcpStream::connect(addr).unwrap()).unwrap();
    assert!(c.fileno().is_some() || cfg!(not(any(unix, windows))));
    c.handshake().unwrap();

    c.write(b"echo me").unwrap();
    let mut echoed = Vec::new();
    while let Some(chunk) = c.read(64).unwrap() {
        echoed.extend(chunk);
    }
    assert_eq!(echoed, b"echo me");

    handle.join().unwrap();
}
