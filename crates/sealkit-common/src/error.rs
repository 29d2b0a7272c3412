//! Common error types for Sealkit.

use thiserror::Error;

/// Result type alias using Sealkit's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Sealkit tooling.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (profile files, key files, sockets)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Cryptographic operation failed
    #[error("crypto error: {0}")]
    Crypto(#[from] sealkit_crypto::Error),
}

impl Error {
    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e)
    }
}

impl From<sealkit_crypto::TlsError> for Error {
    fn from(e: sealkit_crypto::TlsError) -> Self {
        Self::Crypto(e.into())
    }
}

impl From<sealkit_crypto::DrbgError> for Error {
    fn from(e: sealkit_crypto::DrbgError) -> Self {
        Self::Crypto(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealkit_crypto::{ErrorKind, TlsError};

    #[test]
    fn test_conversions() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));

        let err: Error = TlsError::NotConfigured("transport").into();
        match err {
            Error::Crypto(inner) => assert_eq!(inner.kind(), ErrorKind::NotConfigured),
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(Error::config("bad").to_string(), "configuration error: bad");
    }
}
