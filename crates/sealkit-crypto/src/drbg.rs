//! Deterministic random bit generator.
//!
//! A [`Drbg`] is seeded from an [`EntropyPool`] and then produces output from a
//! ChaCha20 stream. Seed material is conditioned with SHA-256 together with an
//! optional personalization string, so independent generators that share one
//! pool still produce unrelated streams.
//!
//! The generator keeps only a weak reference to its pool. Reseeding after the
//! pool has been dropped fails with [`DrbgError::EntropySourceGone`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use sealkit_crypto::drbg::Drbg;
//! use sealkit_crypto::entropy::EntropyPool;
//!
//! let pool = Arc::new(EntropyPool::new());
//! let drbg = Drbg::new(&pool, Some(b"session keys")).unwrap();
//!
//! let mut nonce = [0u8; 24];
//! drbg.random(&mut nonce).unwrap();
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use rand::{CryptoRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::entropy::{EntropyError, EntropyPool};

/// Bytes of pool entropy consumed per seed or reseed.
pub const DRBG_ENTROPY_LEN: usize = 48;

/// Requests served between automatic reseeds.
pub const DRBG_RESEED_INTERVAL: u64 = 10_000;

/// Largest chunk produced per request; longer fills are split.
pub const DRBG_MAX_REQUEST: usize = 1024;

/// Upper bound on personalization and additional input.
pub const DRBG_MAX_INPUT: usize = 256;

const SEED_LABEL: &[u8] = b"sealkit-drbg-seed";
const RESEED_LABEL: &[u8] = b"sealkit-drbg-reseed";
const UPDATE_LABEL: &[u8] = b"sealkit-drbg-update";

/// First 16 bytes of the ChaCha20 keystream under an all-zero key and nonce.
const CHACHA20_ZERO_KAT: [u8; 16] = [
    0x76, 0xb8, 0xe0, 0xad, 0xa0, 0xf1, 0x3d, 0x90, 0x40, 0x5d, 0x6a, 0xe5, 0x53, 0x86, 0xbd, 0x28,
];

/// Random generator errors.
#[derive(Debug, Error)]
pub enum DrbgError {
    #[error("could not initialize entropy source: {0}")]
    EntropySourceFailed(#[from] EntropyError),

    #[error("entropy source has been dropped")]
    EntropySourceGone,

    #[error("input of {0} bytes exceeds the {DRBG_MAX_INPUT} byte limit")]
    InputTooLarge(usize),

    #[error("random source failed: {0}")]
    SourceFailed(String),

    #[error("generator lock poisoned")]
    Poisoned,
}

/// Capability interface for anything that can hand out cryptographic randomness.
///
/// Key generation, signing and TLS sessions all take their randomness through
/// this trait rather than from a global generator.
pub trait RandomByteSource: Send + Sync {
    /// Fill `dest` entirely with random bytes.
    fn fill_random(&self, dest: &mut [u8]) -> Result<(), DrbgError>;
}

impl<T: RandomByteSource + ?Sized> RandomByteSource for Arc<T> {
    fn fill_random(&self, dest: &mut [u8]) -> Result<(), DrbgError> {
        (**self).fill_random(dest)
    }
}

struct DrbgState {
    core: ChaCha20Rng,
    reseed_counter: u64,
    reseed_interval: u64,
    prediction_resistance: bool,
}

/// Pool-seeded ChaCha20 generator.
pub struct Drbg {
    state: Mutex<DrbgState>,
    source: Weak<EntropyPool>,
    personalization: Zeroizing<Vec<u8>>,
}

impl Drbg {
    /// Seed a new generator from `source`.
    ///
    /// # Errors
    /// [`DrbgError::EntropySourceFailed`] if the pool cannot produce a seed.
    pub fn new(source: &Arc<EntropyPool>, personalization: Option<&[u8]>) -> Result<Self, DrbgError> {
        let personalization = personalization.unwrap_or_default();
        if personalization.len() > DRBG_MAX_INPUT {
            return Err(DrbgError::InputTooLarge(personalization.len()));
        }

        let mut entropy = Zeroizing::new([0u8; DRBG_ENTROPY_LEN]);
        source.fill(&mut entropy[..]).map_err(|e| {
            warn!("drbg seeding failed: {}", e);
            DrbgError::EntropySourceFailed(e)
        })?;

        let mut seed = derive_seed(&[SEED_LABEL, &entropy[..], personalization]);
        let core = ChaCha20Rng::from_seed(seed);
        seed.zeroize();

        debug!(
            "drbg seeded ({} bytes of personalization)",
            personalization.len()
        );

        Ok(Self {
            state: Mutex::new(DrbgState {
                core,
                reseed_counter: 0,
                reseed_interval: DRBG_RESEED_INTERVAL,
                prediction_resistance: false,
            }),
            source: Arc::downgrade(source),
            personalization: Zeroizing::new(personalization.to_vec()),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, DrbgState>, DrbgError> {
        self.state.lock().map_err(|_| DrbgError::Poisoned)
    }

    /// Fill `dest` with random bytes.
    pub fn random(&self, dest: &mut [u8]) -> Result<(), DrbgError> {
        self.random_with_add(dest, &[])
    }

    /// Fill `dest`, mixing `additional` into the state before each chunk.
    pub fn random_with_add(&self, dest: &mut [u8], additional: &[u8]) -> Result<(), DrbgError> {
        if additional.len() > DRBG_MAX_INPUT {
            return Err(DrbgError::InputTooLarge(additional.len()));
        }

        let mut state = self.lock()?;
        for chunk in dest.chunks_mut(DRBG_MAX_REQUEST) {
            if state.prediction_resistance || state.reseed_counter >= state.reseed_interval {
                self.reseed_locked(&mut state, additional)?;
            } else if !additional.is_empty() {
                update_locked(&mut state, additional);
            }

            state.core.fill_bytes(chunk);
            state.reseed_counter += 1;
        }
        Ok(())
    }

    /// Pull fresh entropy from the pool and rekey.
    pub fn reseed(&self, additional: Option<&[u8]>) -> Result<(), DrbgError> {
        let additional = additional.unwrap_or_default();
        if additional.len() > DRBG_MAX_INPUT {
            return Err(DrbgError::InputTooLarge(additional.len()));
        }
        let mut state = self.lock()?;
        self.reseed_locked(&mut state, additional)
    }

    /// Rekey from the current state and `additional` without touching the pool.
    pub fn update(&self, additional: &[u8]) -> Result<(), DrbgError> {
        if additional.len() > DRBG_MAX_INPUT {
            return Err(DrbgError::InputTooLarge(additional.len()));
        }
        update_locked(&mut *self.lock()?, additional);
        Ok(())
    }

    /// Reseed before every request when enabled.
    pub fn set_prediction_resistance(&self, enabled: bool) -> Result<(), DrbgError> {
        self.lock()?.prediction_resistance = enabled;
        Ok(())
    }

    /// Number of requests served before an automatic reseed.
    pub fn set_reseed_interval(&self, interval: u64) -> Result<(), DrbgError> {
        self.lock()?.reseed_interval = interval;
        Ok(())
    }

    pub fn reseed_interval(&self) -> Result<u64, DrbgError> {
        Ok(self.lock()?.reseed_interval)
    }

    /// Requests served since the last (re)seed.
    pub fn reseed_counter(&self) -> Result<u64, DrbgError> {
        Ok(self.lock()?.reseed_counter)
    }

    pub fn personalization(&self) -> &[u8] {
        &self.personalization
    }

    fn reseed_locked(&self, state: &mut DrbgState, additional: &[u8]) -> Result<(), DrbgError> {
        let pool = self.source.upgrade().ok_or(DrbgError::EntropySourceGone)?;

        let mut entropy = Zeroizing::new([0u8; DRBG_ENTROPY_LEN]);
        pool.fill(&mut entropy[..]).map_err(|e| {
            warn!("drbg reseed failed: {}", e);
            DrbgError::EntropySourceFailed(e)
        })?;

        let mut carry = [0u8; 32];
        state.core.fill_bytes(&mut carry);
        let mut seed = derive_seed(&[
            RESEED_LABEL,
            &carry[..],
            &entropy[..],
            self.personalization.as_slice(),
            additional,
        ]);
        state.core = ChaCha20Rng::from_seed(seed);
        state.reseed_counter = 0;

        carry.zeroize();
        seed.zeroize();
        debug!("drbg reseeded");
        Ok(())
    }
}

impl RandomByteSource for Drbg {
    fn fill_random(&self, dest: &mut [u8]) -> Result<(), DrbgError> {
        self.random(dest)
    }
}

impl fmt::Debug for Drbg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drbg")
            .field("personalization_len", &self.personalization.len())
            .field("source_alive", &(self.source.strong_count() > 0))
            .finish_non_exhaustive()
    }
}

fn update_locked(state: &mut DrbgState, additional: &[u8]) {
    let mut carry = [0u8; 32];
    state.core.fill_bytes(&mut carry);
    let mut seed = derive_seed(&[UPDATE_LABEL, &carry[..], additional]);
    state.core = ChaCha20Rng::from_seed(seed);
    carry.zeroize();
    seed.zeroize();
}

/// Length-prefixed SHA-256 over every part.
fn derive_seed(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u32).to_be_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Run the generator's built-in known-answer checks.
///
/// Side-effect free; does not touch any pool or live generator.
pub fn self_test() -> bool {
    let mut core = ChaCha20Rng::from_seed([0u8; 32]);
    let mut block = [0u8; 16];
    core.fill_bytes(&mut block);
    if block != CHACHA20_ZERO_KAT {
        warn!("drbg self-test: keystream known-answer mismatch");
        return false;
    }

    let entropy = [0x5a; DRBG_ENTROPY_LEN];
    let alpha = derive_seed(&[SEED_LABEL, &entropy[..], b"alpha"]);
    let again = derive_seed(&[SEED_LABEL, &entropy[..], b"alpha"]);
    let beta = derive_seed(&[SEED_LABEL, &entropy[..], b"beta"]);
    if alpha != again || alpha == beta {
        warn!("drbg self-test: seed derivation is not deterministic or not separated");
        return false;
    }

    let mut state = DrbgState {
        core: ChaCha20Rng::from_seed(alpha),
        reseed_counter: 0,
        reseed_interval: DRBG_RESEED_INTERVAL,
        prediction_resistance: false,
    };
    let mut before = [0u8; 32];
    ChaCha20Rng::from_seed(alpha).fill_bytes(&mut before);
    update_locked(&mut state, b"");
    let mut after = [0u8; 32];
    state.core.fill_bytes(&mut after);
    if before == after {
        warn!("drbg self-test: update did not change the stream");
        return false;
    }

    true
}

/// Adapts a [`RandomByteSource`] to `rand::RngCore` for APIs that need one.
///
/// `RngCore::fill_bytes` cannot fail, so a source failure is latched, the
/// buffer is zeroed, and [`RngAdapter::finish`] reports the error. Output of an
/// operation that observed a failure must be discarded.
pub struct RngAdapter<'a> {
    source: &'a dyn RandomByteSource,
    failure: Option<DrbgError>,
}

impl<'a> RngAdapter<'a> {
    pub fn new(source: &'a dyn RandomByteSource) -> Self {
        Self {
            source,
            failure: None,
        }
    }

    /// Consume the adapter, returning the first failure it observed.
    pub fn finish(self) -> Result<(), DrbgError> {
        match self.failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl RngCore for RngAdapter<'_> {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.fill_bytes(&mut buf);
        u32::from_le_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.fill_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        if let Err(e) = self.source.fill_random(dest) {
            dest.zeroize();
            if self.failure.is_none() {
                self.failure = Some(e);
            }
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.source.fill_random(dest).map_err(rand::Error::new)
    }
}

impl CryptoRng for RngAdapter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::{EntropyCollector, OsEntropy};

    struct Broken;

    impl EntropyCollector for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn poll(&mut self, _dest: &mut [u8]) -> Result<usize, EntropyError> {
            Err(EntropyError::SourceFailed("broken".into()))
        }
    }

    struct Failing;

    impl RandomByteSource for Failing {
        fn fill_random(&self, _dest: &mut [u8]) -> Result<(), DrbgError> {
            Err(DrbgError::SourceFailed("unplugged".into()))
        }
    }

    fn pool() -> Arc<EntropyPool> {
        Arc::new(EntropyPool::new())
    }

    #[test]
    fn test_self_test_passes() {
        assert!(self_test());
    }

    #[test]
    fn test_random_fills_buffer() {
        let drbg = Drbg::new(&pool(), None).unwrap();
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        drbg.random(&mut a).unwrap();
        drbg.random(&mut b).unwrap();
        assert_ne!(a, [0u8; 64]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_large_request_is_chunked() {
        let drbg = Drbg::new(&pool(), None).unwrap();
        let mut buf = vec![0u8; DRBG_MAX_REQUEST * 3 + 7];
        drbg.random(&mut buf).unwrap();
        assert_eq!(drbg.reseed_counter().unwrap(), 4);
    }

    #[test]
    fn test_seeding_failure_is_distinct() {
        let broken = EntropyPool::empty();
        broken.add_source(Box::new(Broken), 1, true).unwrap();
        let err = Drbg::new(&Arc::new(broken), None).unwrap_err();
        assert!(matches!(err, DrbgError::EntropySourceFailed(_)));
    }

    #[test]
    fn test_personalization_limit() {
        let long = vec![0u8; DRBG_MAX_INPUT + 1];
        assert!(matches!(
            Drbg::new(&pool(), Some(&long)),
            Err(DrbgError::InputTooLarge(_))
        ));
    }

    #[test]
    fn test_reseed_interval_triggers_reseed() {
        let pool = pool();
        let drbg = Drbg::new(&pool, Some(b"interval")).unwrap();
        drbg.set_reseed_interval(2).unwrap();

        let mut buf = [0u8; 16];
        drbg.random(&mut buf).unwrap();
        drbg.random(&mut buf).unwrap();
        assert_eq!(drbg.reseed_counter().unwrap(), 2);

        drbg.random(&mut buf).unwrap();
        assert_eq!(drbg.reseed_counter().unwrap(), 1);
    }

    #[test]
    fn test_reseed_after_pool_dropped() {
        let pool = pool();
        let drbg = Drbg::new(&pool, None).unwrap();
        drop(pool);

        let mut buf = [0u8; 8];
        drbg.random(&mut buf).unwrap();
        assert!(matches!(drbg.reseed(None), Err(DrbgError::EntropySourceGone)));

        drbg.set_prediction_resistance(true).unwrap();
        assert!(matches!(
            drbg.random(&mut buf),
            Err(DrbgError::EntropySourceGone)
        ));
    }

    #[test]
    fn test_generators_share_one_pool() {
        let shared = Arc::new(EntropyPool::empty());
        shared.add_source(Box::new(OsEntropy), 32, true).unwrap();

        let a = Drbg::new(&shared, Some(b"tls")).unwrap();
        let b = Drbg::new(&shared, Some(b"keys")).unwrap();
        let mut out_a = [0u8; 32];
        let mut out_b = [0u8; 32];
        a.random(&mut out_a).unwrap();
        b.random(&mut out_b).unwrap();
        assert_ne!(out_a, out_b);
        assert_eq!(a.personalization(), b"tls");
    }

    #[test]
    fn test_adapter_latches_failure() {
        let source = Failing;
        let mut rng = RngAdapter::new(&source);
        let mut buf = [0xffu8; 8];
        rng.fill_bytes(&mut buf);
        assert_eq!(buf, [0u8; 8]);
        assert!(rng.try_fill_bytes(&mut buf).is_err());
        assert!(matches!(rng.finish(), Err(DrbgError::SourceFailed(_))));
    }

    #[test]
    fn test_adapter_passes_through() {
        let drbg = Drbg::new(&pool(), None).unwrap();
        let mut rng = RngAdapter::new(&drbg);
        let _ = rng.next_u64();
        rng.finish().unwrap();
    }
}
