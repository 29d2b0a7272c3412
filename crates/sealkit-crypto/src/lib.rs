//! Cryptographic session layer for Sealkit.
//!
//! This crate provides:
//! - An entropy pool fed by pluggable collectors
//! - A deterministic random bit generator seeded from that pool
//! - DES and triple-DES helpers in CBC and ECB modes
//! - Elliptic-curve key contexts (generation, PEM import, hex export, ECDSA)
//! - TLS client/server sessions over a caller-supplied byte transport
//!
//! # Design
//!
//! Randomness flows in one direction: `EntropyPool` seeds `Drbg`, and every
//! operation that needs random bytes takes the generator explicitly through
//! the [`RandomByteSource`] trait. Nothing reaches for a global RNG, so tests
//! can substitute fixed-output sources.
//!
//! Sessions never own the generator; they hold an `Arc` to it. A `Drbg` is
//! internally locked and may be shared by any number of sessions and key
//! contexts.

#![deny(unsafe_code)]

pub mod cipher;
pub mod codec;
pub mod drbg;
pub mod ec;
pub mod entropy;
pub mod error;
pub mod tls;
pub mod transport;

pub use cipher::{CipherError, CipherMode, Des, TripleDes};
pub use codec::CodecError;
pub use drbg::{self_test, Drbg, DrbgError, RandomByteSource, RngAdapter};
pub use ec::{Curve, EcError, EcKeyContext};
pub use entropy::{EntropyCollector, EntropyError, EntropyPool, OsEntropy, TimingEntropy};
pub use error::{Error, ErrorKind, Result};
pub use tls::{Endpoint, SessionState, TlsError, TlsSession, VerifyMode, VerifyResult};
pub use transport::{MemoryTransport, Transport};
