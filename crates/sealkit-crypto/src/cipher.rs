//! DES and triple-DES helpers.
//!
//! Every call is self-contained: the key schedule is built, used, and dropped
//! inside the call. Inputs must already be a whole number of 8-byte blocks;
//! no padding is applied.
//!
//! ```
//! use sealkit_crypto::cipher::Des;
//!
//! let key = [0x13, 0x34, 0x57, 0x79, 0x9b, 0xbc, 0xdf, 0xf1];
//! let iv = [0u8; 8];
//! let ct = Des::encrypt("CBC", &key, b"8 bytes!", &iv).unwrap();
//! let pt = Des::decrypt("CBC", &key, &ct, &iv).unwrap();
//! assert_eq!(pt, b"8 bytes!");
//! ```

use std::fmt;
use std::str::FromStr;

use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use des::{TdesEde2, TdesEde3};
use thiserror::Error;

/// DES block size in bytes (shared by triple-DES).
pub const DES_BLOCK_SIZE: usize = 8;

/// Single-DES key length.
pub const DES_KEY_SIZE: usize = 8;

/// Two-key triple-DES key length.
pub const DES3_KEY_SIZE_2KEY: usize = 16;

/// Three-key triple-DES key length.
pub const DES3_KEY_SIZE_3KEY: usize = 24;

/// Block cipher errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("unknown cipher mode: {0:?}")]
    UnknownMode(String),

    #[error("invalid key length {actual}, expected {expected}")]
    InvalidKeyLength { expected: &'static str, actual: usize },

    #[error("invalid IV length {0}, expected {DES_BLOCK_SIZE}")]
    InvalidIvLength(usize),

    #[error("input length {0} is not a non-zero multiple of {DES_BLOCK_SIZE}")]
    InvalidInputLength(usize),
}

/// Chaining mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    Cbc,
    Ecb,
}

impl FromStr for CipherMode {
    type Err = CipherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CBC" => Ok(Self::Cbc),
            "ECB" => Ok(Self::Ecb),
            other => Err(CipherError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for CipherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cbc => f.write_str("CBC"),
            Self::Ecb => f.write_str("ECB"),
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

/// Single DES.
pub struct Des;

impl Des {
    pub fn encrypt(mode: &str, key: &[u8], plaintext: &[u8], iv: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mode = mode.parse()?;
        let cipher = des_key(key)?;
        run(&cipher, mode, Direction::Encrypt, plaintext, iv)
    }

    pub fn decrypt(mode: &str, key: &[u8], ciphertext: &[u8], iv: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mode = mode.parse()?;
        let cipher = des_key(key)?;
        run(&cipher, mode, Direction::Decrypt, ciphertext, iv)
    }
}

/// Triple DES (EDE) with a 16-byte two-key or 24-byte three-key bundle.
pub struct TripleDes;

impl TripleDes {
    pub fn encrypt(mode: &str, key: &[u8], plaintext: &[u8], iv: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mode = mode.parse()?;
        Self::dispatch(mode, Direction::Encrypt, key, plaintext, iv)
    }

    pub fn decrypt(mode: &str, key: &[u8], ciphertext: &[u8], iv: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mode = mode.parse()?;
        Self::dispatch(mode, Direction::Decrypt, key, ciphertext, iv)
    }

    fn dispatch(
        mode: CipherMode,
        direction: Direction,
        key: &[u8],
        input: &[u8],
        iv: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        match key.len() {
            DES3_KEY_SIZE_2KEY => {
                let cipher = TdesEde2::new_from_slice(key).map_err(|_| tdes_key_error(key))?;
                run(&cipher, mode, direction, input, iv)
            }
            DES3_KEY_SIZE_3KEY => {
                let cipher = TdesEde3::new_from_slice(key).map_err(|_| tdes_key_error(key))?;
                run(&cipher, mode, direction, input, iv)
            }
            _ => Err(tdes_key_error(key)),
        }
    }
}

fn des_key(key: &[u8]) -> Result<des::Des, CipherError> {
    des::Des::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength {
        expected: "8",
        actual: key.len(),
    })
}

fn tdes_key_error(key: &[u8]) -> CipherError {
    CipherError::InvalidKeyLength {
        expected: "16 or 24",
        actual: key.len(),
    }
}

fn run<C>(cipher: &C, mode: CipherMode, direction: Direction, input: &[u8], iv: &[u8]) -> Result<Vec<u8>, CipherError>
where
    C: BlockEncrypt + BlockDecrypt,
{
    if input.is_empty() || input.len() % DES_BLOCK_SIZE != 0 {
        return Err(CipherError::InvalidInputLength(input.len()));
    }

    match mode {
        CipherMode::Ecb => Ok(ecb(cipher, direction, input)),
        CipherMode::Cbc => {
            let iv: [u8; DES_BLOCK_SIZE] = iv
                .try_into()
                .map_err(|_| CipherError::InvalidIvLength(iv.len()))?;
            Ok(cbc(cipher, direction, input, iv))
        }
    }
}

fn ecb<C: BlockEncrypt + BlockDecrypt>(cipher: &C, direction: Direction, input: &[u8]) -> Vec<u8> {
    let mut out = input.to_vec();
    for chunk in out.chunks_exact_mut(DES_BLOCK_SIZE) {
        let block = GenericArray::from_mut_slice(chunk);
        match direction {
            Direction::Encrypt => cipher.encrypt_block(block),
            Direction::Decrypt => cipher.decrypt_block(block),
        }
    }
    out
}

fn cbc<C: BlockEncrypt + BlockDecrypt>(
    cipher: &C,
    direction: Direction,
    input: &[u8],
    iv: [u8; DES_BLOCK_SIZE],
) -> Vec<u8> {
    let mut out = input.to_vec();
    let mut chain = iv;

    for chunk in out.chunks_exact_mut(DES_BLOCK_SIZE) {
        match direction {
            Direction::Encrypt => {
                xor_in_place(chunk, &chain);
                cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
                chain.copy_from_slice(chunk);
            }
            Direction::Decrypt => {
                let mut next = [0u8; DES_BLOCK_SIZE];
                next.copy_from_slice(chunk);
                cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
                xor_in_place(chunk, &chain);
                chain = next;
            }
        }
    }
    out
}

fn xor_in_place(block: &mut [u8], mask: &[u8; DES_BLOCK_SIZE]) {
    for (b, m) in block.iter_mut().zip(mask) {
        *b ^= m;
    }
}
