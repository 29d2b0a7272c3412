//! Entropy accumulation.
//!
//! An [`EntropyPool`] hashes the output of its registered collectors into a
//! SHA-512 accumulator. The DRBG draws its seed material from [`EntropyPool::fill`],
//! which refuses to produce output until every collector has contributed at
//! least its threshold.
//!
//! # Example
//!
//! ```
//! use sealkit_crypto::entropy::EntropyPool;
//!
//! let pool = EntropyPool::new();
//! pool.gather().unwrap();
//!
//! let mut seed = [0u8; 48];
//! pool.fill(&mut seed).unwrap();
//! ```

use std::sync::{Mutex, MutexGuard};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroize;

/// Size of one pool output block (SHA-512 digest length).
pub const ENTROPY_BLOCK_SIZE: usize = 64;

/// Maximum bytes requested from a single collector per gather round.
pub const ENTROPY_MAX_GATHER: usize = 128;

/// Maximum number of registered collectors.
pub const ENTROPY_MAX_SOURCES: usize = 20;

/// Gather rounds attempted by [`EntropyPool::fill`] before giving up.
const MAX_GATHER_ROUNDS: usize = 256;

/// Source index used for bytes supplied through [`EntropyPool::update_manual`].
const MANUAL_SOURCE_ID: u8 = ENTROPY_MAX_SOURCES as u8;

/// Entropy pool errors.
#[derive(Debug, Error)]
pub enum EntropyError {
    #[error("entropy source '{0}' failed")]
    SourceFailed(String),

    #[error("too many entropy sources (max {ENTROPY_MAX_SOURCES})")]
    MaxSources,

    #[error("no strong entropy source registered")]
    NoStrongSource,

    #[error("entropy thresholds not reached after {0} gather rounds")]
    ThresholdNotReached(usize),

    #[error("requested {0} bytes, pool output is limited to {ENTROPY_BLOCK_SIZE}")]
    RequestTooLarge(usize),

    #[error("entropy pool lock poisoned")]
    Poisoned,
}

/// A provider of environmental entropy.
pub trait EntropyCollector: Send {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Writes fresh entropy into `dest` and returns the number of bytes written.
    fn poll(&mut self, dest: &mut [u8]) -> Result<usize, EntropyError>;
}

/// Operating-system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropyCollector for OsEntropy {
    fn name(&self) -> &str {
        "os"
    }

    fn poll(&mut self, dest: &mut [u8]) -> Result<usize, EntropyError> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|_| EntropyError::SourceFailed(self.name().to_string()))?;
        Ok(dest.len())
    }
}

/// Clock-jitter collector. Weak on its own; it only supplements a strong source.
#[derive(Debug)]
pub struct TimingEntropy {
    origin: Instant,
}

impl TimingEntropy {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TimingEntropy {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropyCollector for TimingEntropy {
    fn name(&self) -> &str {
        "timing"
    }

    fn poll(&mut self, dest: &mut [u8]) -> Result<usize, EntropyError> {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let elapsed = self.origin.elapsed().as_nanos() as u64;
        let sample = (wall ^ elapsed.rotate_left(29)).to_le_bytes();

        let len = dest.len().min(sample.len());
        dest[..len].copy_from_slice(&sample[..len]);
        Ok(len)
    }
}

struct SourceSlot {
    collector: Box<dyn EntropyCollector>,
    threshold: usize,
    strong: bool,
    collected: usize,
}

struct PoolState {
    accumulator: Sha512,
    sources: Vec<SourceSlot>,
}

impl PoolState {
    fn feed(&mut self, source_id: u8, data: &[u8]) {
        // Long inputs are compressed first so the length fits the one-byte header.
        if data.len() > ENTROPY_BLOCK_SIZE {
            let mut digest = Sha512::digest(data);
            self.feed_block(source_id, digest.as_slice());
            digest.as_mut_slice().zeroize();
        } else {
            self.feed_block(source_id, data);
        }
    }

    fn feed_block(&mut self, source_id: u8, block: &[u8]) {
        self.accumulator.update([source_id, block.len() as u8]);
        self.accumulator.update(block);
    }

    fn gather(&mut self) -> Result<(), EntropyError> {
        let mut buf = [0u8; ENTROPY_MAX_GATHER];

        for index in 0..self.sources.len() {
            let slot = &mut self.sources[index];
            let len = match slot.collector.poll(&mut buf) {
                Ok(len) => len.min(ENTROPY_MAX_GATHER),
                Err(e) => {
                    warn!("entropy collector '{}' failed: {}", slot.collector.name(), e);
                    buf.zeroize();
                    return Err(e);
                }
            };
            slot.collected += len;

            if len > 0 {
                self.feed(index as u8, &buf[..len]);
            }
        }

        buf.zeroize();
        Ok(())
    }

    fn thresholds_reached(&self) -> bool {
        self.sources.iter().all(|s| s.collected >= s.threshold)
    }
}

/// Thread-safe entropy accumulator.
///
/// All methods take `&self`; share it with `Arc<EntropyPool>`.
pub struct EntropyPool {
    state: Mutex<PoolState>,
}

impl EntropyPool {
    /// Create a pool with the OS CSPRNG (strong) and a timing collector (weak).
    pub fn new() -> Self {
        let pool = Self::empty();
        {
            let mut state = pool.state.lock().unwrap_or_else(|p| p.into_inner());
            state.sources.push(SourceSlot {
                collector: Box::new(OsEntropy),
                threshold: 32,
                strong: true,
                collected: 0,
            });
            state.sources.push(SourceSlot {
                collector: Box::new(TimingEntropy::new()),
                threshold: 4,
                strong: false,
                collected: 0,
            });
        }
        pool
    }

    /// Create a pool with no collectors registered.
    pub fn empty() -> Self {
        Self {
            state: Mutex::new(PoolState {
                accumulator: Sha512::new(),
                sources: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolState>, EntropyError> {
        self.state.lock().map_err(|_| EntropyError::Poisoned)
    }

    /// Discard accumulated state. Registered collectors are kept.
    pub fn reinitialize(&self) -> Result<(), EntropyError> {
        let mut state = self.lock()?;
        state.accumulator = Sha512::new();
        for slot in &mut state.sources {
            slot.collected = 0;
        }
        Ok(())
    }

    /// Register a collector.
    ///
    /// `threshold` is the number of bytes it must contribute before the pool
    /// releases output. At least one collector must be `strong`.
    pub fn add_source(
        &self,
        collector: Box<dyn EntropyCollector>,
        threshold: usize,
        strong: bool,
    ) -> Result<(), EntropyError> {
        let mut state = self.lock()?;
        if state.sources.len() >= ENTROPY_MAX_SOURCES {
            return Err(EntropyError::MaxSources);
        }
        debug!(
            "registering entropy collector '{}' (threshold {}, strong {})",
            collector.name(),
            threshold,
            strong
        );
        state.sources.push(SourceSlot {
            collector,
            threshold,
            strong,
            collected: 0,
        });
        Ok(())
    }

    /// Number of registered collectors.
    pub fn source_count(&self) -> usize {
        self.lock().map(|s| s.sources.len()).unwrap_or(0)
    }

    /// Poll every collector once.
    pub fn gather(&self) -> Result<(), EntropyError> {
        self.lock()?.gather()
    }

    /// Mix caller-supplied bytes into the accumulator.
    pub fn update_manual(&self, data: &[u8]) -> Result<(), EntropyError> {
        self.lock()?.feed(MANUAL_SOURCE_ID, data);
        Ok(())
    }

    /// Produce up to [`ENTROPY_BLOCK_SIZE`] bytes of conditioned entropy.
    pub fn fill(&self, out: &mut [u8]) -> Result<(), EntropyError> {
        if out.len() > ENTROPY_BLOCK_SIZE {
            return Err(EntropyError::RequestTooLarge(out.len()));
        }

        let mut state = self.lock()?;
        if !state.sources.iter().any(|s| s.strong) {
            return Err(EntropyError::NoStrongSource);
        }

        let mut rounds = 0;
        loop {
            if rounds == MAX_GATHER_ROUNDS {
                return Err(EntropyError::ThresholdNotReached(rounds));
            }
            rounds += 1;
            state.gather()?;
            if state.thresholds_reached() {
                break;
            }
        }

        let accumulator = std::mem::replace(&mut state.accumulator, Sha512::new());
        let mut first = accumulator.finalize();

        // Restart the accumulator from the first digest so future output
        // still depends on everything gathered so far.
        state.accumulator.update(first.as_slice());
        let mut second = Sha512::digest(first.as_slice());
        out.copy_from_slice(&second[..out.len()]);

        for slot in &mut state.sources {
            slot.collected = 0;
        }
        first.as_mut_slice().zeroize();
        second.as_mut_slice().zeroize();
        Ok(())
    }
}

impl Default for EntropyPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EntropyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntropyPool")
            .field("sources", &self.source_count())
            .finish()
    }
}
