//! TLS sessions over a caller-supplied [`Transport`](crate::Transport).
//!
//! A [`TlsSession`] is configured (role, verification policy, random source,
//! transport), driven through the handshake by repeated calls that may report
//! [`TlsError::WantRead`] / [`TlsError::WantWrite`] on non-blocking transports,
//! and then used for record-layer reads and writes.
//!
//! ```no_run
//! use std::net::TcpStream;
//! use std::sync::Arc;
//! use sealkit_crypto::{Drbg, EntropyPool, Endpoint, TlsSession, VerifyMode};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = Arc::new(EntropyPool::new());
//! let rng = Arc::new(Drbg::new(&pool, None)?);
//!
//! let mut session = TlsSession::new();
//! session.set_endpoint(Endpoint::Client)?;
//! session.set_verify_mode(VerifyMode::None)?;
//! session.set_rng(rng)?;
//! session.set_transport(TcpStream::connect("127.0.0.1:4433")?)?;
//! session.handshake()?;
//! session.write(b"ping")?;
//! let reply = session.read(256)?;
//! # let _ = reply;
//! session.close_notify()?;
//! # Ok(())
//! # }
//! ```

mod rng;
mod session;
mod verify;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub use session::TlsSession;

/// Numeric role identifiers.
pub const SSL_IS_CLIENT: u32 = 0;
pub const SSL_IS_SERVER: u32 = 1;

/// Numeric verification policies.
pub const SSL_VERIFY_NONE: u32 = 0;
pub const SSL_VERIFY_OPTIONAL: u32 = 1;
pub const SSL_VERIFY_REQUIRED: u32 = 2;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TlsError {
    #[error("could not set up TLS context: {0}")]
    Setup(String),

    #[error("session is missing its {0}")]
    NotConfigured(&'static str),

    #[error("operation not allowed in state {0}")]
    InvalidState(SessionState),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid PEM input: {0}")]
    Pem(String),

    #[error("transport would block on read")]
    WantRead,

    #[error("transport would block on write")]
    WantWrite,

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("close notify failed: {0}")]
    CloseFailed(String),
}

impl TlsError {
    /// True for the would-block conditions; the caller retries the same call
    /// once the transport is ready.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WantRead | Self::WantWrite)
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting configuration; no protocol state exists yet.
    Configured,
    /// Handshake started but not complete.
    Handshaking,
    Established,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configured => "configured",
            Self::Handshaking => "handshaking",
            Self::Established => "established",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Client,
    Server,
}

impl TryFrom<u32> for Endpoint {
    type Error = TlsError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            SSL_IS_CLIENT => Ok(Self::Client),
            SSL_IS_SERVER => Ok(Self::Server),
            other => Err(TlsError::InvalidArgument(format!("unknown endpoint {other}"))),
        }
    }
}

impl From<Endpoint> for u32 {
    fn from(endpoint: Endpoint) -> Self {
        match endpoint {
            Endpoint::Client => SSL_IS_CLIENT,
            Endpoint::Server => SSL_IS_SERVER,
        }
    }
}

impl FromStr for Endpoint {
    type Err = TlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            other => Err(TlsError::InvalidArgument(format!("unknown endpoint {other:?}"))),
        }
    }
}

/// Peer certificate policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Do not validate the peer certificate chain.
    None,
    /// Validate, record the outcome, and continue either way.
    Optional,
    /// Validate and abort the handshake on failure.
    Required,
}

impl TryFrom<u32> for VerifyMode {
    type Error = TlsError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            SSL_VERIFY_NONE => Ok(Self::None),
            SSL_VERIFY_OPTIONAL => Ok(Self::Optional),
            SSL_VERIFY_REQUIRED => Ok(Self::Required),
            other => Err(TlsError::InvalidArgument(format!("unknown verify mode {other}"))),
        }
    }
}

impl From<VerifyMode> for u32 {
    fn from(mode: VerifyMode) -> Self {
        match mode {
            VerifyMode::None => SSL_VERIFY_NONE,
            VerifyMode::Optional => SSL_VERIFY_OPTIONAL,
            VerifyMode::Required => SSL_VERIFY_REQUIRED,
        }
    }
}

impl FromStr for VerifyMode {
    type Err = TlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "optional" => Ok(Self::Optional),
            "required" => Ok(Self::Required),
            other => Err(TlsError::InvalidArgument(format!("unknown verify mode {other:?}"))),
        }
    }
}

/// Outcome of peer certificate validation for the current handshake.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VerifyResult {
    /// No certificate was validated (verification disabled, or not reached).
    #[default]
    Skipped,
    Trusted,
    Untrusted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_constants() {
        assert_eq!(Endpoint::try_from(0).unwrap(), Endpoint::Client);
        assert_eq!(Endpoint::try_from(1).unwrap(), Endpoint::Server);
        assert!(Endpoint::try_from(2).is_err());

        assert_eq!(VerifyMode::try_from(0).unwrap(), VerifyMode::None);
        assert_eq!(VerifyMode::try_from(1).unwrap(), VerifyMode::Optional);
        assert_eq!(VerifyMode::try_from(2).unwrap(), VerifyMode::Required);
        assert!(VerifyMode::try_from(3).is_err());

        assert_eq!(u32::from(Endpoint::Server), SSL_IS_SERVER);
        assert_eq!(u32::from(VerifyMode::Required), SSL_VERIFY_REQUIRED);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("server".parse::<Endpoint>().unwrap(), Endpoint::Server);
        assert_eq!("optional".parse::<VerifyMode>().unwrap(), VerifyMode::Optional);
        assert!("peer".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_retryable() {
        assert!(TlsError::WantRead.is_retryable());
        assert!(TlsError::WantWrite.is_retryable());
        assert!(!TlsError::HandshakeFailed("x".into()).is_retryable());
        assert!(!TlsError::NotConfigured("transport").is_retryable());
    }
}
