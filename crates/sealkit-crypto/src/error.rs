//! Crate-wide error type.
//!
//! Each module reports its own error enum; [`Error`] wraps them so callers can
//! use one `Result` and still branch on [`ErrorKind`].

use thiserror::Error;

use crate::cipher::CipherError;
use crate::codec::CodecError;
use crate::drbg::DrbgError;
use crate::ec::EcError;
use crate::entropy::EntropyError;
use crate::tls::TlsError;

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Entropy(#[from] EntropyError),

    #[error(transparent)]
    Drbg(#[from] DrbgError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Ec(#[from] EcError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// What went wrong, independent of which module reported it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A context could not be set up.
    AllocationFailure,
    /// The entropy chain could not produce a seed or random bytes.
    EntropySourceFailure,
    /// The transport has no data yet; retry the same call.
    WouldBlockOnRead,
    /// The transport cannot accept data yet; retry the same call.
    WouldBlockOnWrite,
    HandshakeFailure,
    WriteFailure,
    ReadFailure,
    CloseFailure,
    /// A caller-supplied value was out of range or malformed.
    InvalidArgument,
    /// A private key or certificate could not be parsed.
    KeyParseFailure,
    /// Key material was requested from an empty context.
    KeyExtractionFailure,
    /// A session was used before all required settings were bound.
    NotConfigured,
    /// The operation is not valid in the session's current state.
    InvalidState,
    SigningFailure,
    CipherFailure,
    CodecFailure,
}

impl ErrorKind {
    /// True only for the would-block kinds.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::WouldBlockOnRead | Self::WouldBlockOnWrite)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Entropy(_) => ErrorKind::EntropySourceFailure,
            Self::Drbg(e) => match e {
                DrbgError::InputTooLarge(_) => ErrorKind::InvalidArgument,
                DrbgError::EntropySourceFailed(_)
                | DrbgError::EntropySourceGone
                | DrbgError::SourceFailed(_)
                | DrbgError::Poisoned => ErrorKind::EntropySourceFailure,
            },
            Self::Cipher(_) => ErrorKind::CipherFailure,
            Self::Ec(e) => match e {
                EcError::UnknownCurve(_) | EcError::EmptyDigest | EcError::InvalidSignature(_) => {
                    ErrorKind::InvalidArgument
                }
                EcError::Empty => ErrorKind::KeyExtractionFailure,
                EcError::Rng(_) => ErrorKind::EntropySourceFailure,
                EcError::KeyGeneration(_) => ErrorKind::AllocationFailure,
                EcError::KeyParse(_) => ErrorKind::KeyParseFailure,
                EcError::Signing(_) => ErrorKind::SigningFailure,
            },
            Self::Tls(e) => match e {
                TlsError::Setup(_) => ErrorKind::AllocationFailure,
                TlsError::NotConfigured(_) => ErrorKind::NotConfigured,
                TlsError::InvalidState(_) => ErrorKind::InvalidState,
                TlsError::InvalidArgument(_) => ErrorKind::InvalidArgument,
                TlsError::Pem(_) => ErrorKind::KeyParseFailure,
                TlsError::WantRead => ErrorKind::WouldBlockOnRead,
                TlsError::WantWrite => ErrorKind::WouldBlockOnWrite,
                TlsError::HandshakeFailed(_) => ErrorKind::HandshakeFailure,
                TlsError::WriteFailed(_) => ErrorKind::WriteFailure,
                TlsError::ReadFailed(_) => ErrorKind::ReadFailure,
                TlsError::CloseFailed(_) => ErrorKind::CloseFailure,
            },
            Self::Codec(_) => ErrorKind::CodecFailure,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
