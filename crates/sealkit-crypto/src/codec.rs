//! Text encodings used at the edges of the crate.
//!
//! Key and signature material is exported as upper-case hex; certificates and
//! opaque blobs travel as standard base64.

use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid base64: {0}")]
    Base64(String),

    #[error("invalid hex: {0}")]
    Hex(String),
}

/// Standard (padded) base64.
pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn base64_decode(text: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| CodecError::Base64(e.to_string()))
}

/// Upper-case hex, two digits per byte, no separators.
pub fn to_upper_hex(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Accepts either case.
pub fn from_hex(text: &str) -> Result<Vec<u8>, CodecError> {
    hex::decode(text.trim()).map_err(|e| CodecError::Hex(e.to_string()))
}
