//! Routes the record layer's random values to the session's bound source.
//!
//! The crypto provider wants a `&'static dyn SecureRandom`, while each session
//! carries its own `Arc<dyn RandomByteSource>`. The provider therefore points
//! at a single static that reads whichever source the current thread has
//! entered through [`RngScope`]. Every session call that can reach the
//! provider holds a scope for its duration.

use std::cell::RefCell;
use std::sync::Arc;

use rustls::crypto::{GetRandomFailed, SecureRandom};
use tracing::warn;

use crate::drbg::RandomByteSource;

thread_local! {
    static ACTIVE: RefCell<Option<Arc<dyn RandomByteSource>>> = const { RefCell::new(None) };
}

#[derive(Debug)]
pub(crate) struct SessionRandom;

pub(crate) static SESSION_RANDOM: SessionRandom = SessionRandom;

impl SecureRandom for SessionRandom {
    fn fill(&self, buf: &mut [u8]) -> Result<(), GetRandomFailed> {
        ACTIVE.with(|slot| match slot.borrow().as_ref() {
            Some(source) => source.fill_random(buf).map_err(|e| {
                warn!(error = %e, "session random source failed");
                GetRandomFailed
            }),
            None => {
                warn!("random bytes requested outside a session scope");
                Err(GetRandomFailed)
            }
        })
    }
}

/// Binds a source to the current thread until dropped.
pub(crate) struct RngScope {
    previous: Option<Arc<dyn RandomByteSource>>,
}

impl RngScope {
    pub(crate) fn enter(source: Arc<dyn RandomByteSource>) -> Self {
        let previous = ACTIVE.with(|slot| slot.replace(Some(source)));
        Self { previous }
    }
}

impl Drop for RngScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE.with(|slot| {
            slot.replace(previous);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drbg::DrbgError;

    struct Constant(u8);

    impl RandomByteSource for Constant {
        fn fill_random(&self, dest: &mut [u8]) -> Result<(), DrbgError> {
            dest.fill(self.0);
            Ok(())
        }
    }

    #[test]
    fn test_fill_outside_scope_fails() {
        let mut buf = [0u8; 4];
        assert!(SESSION_RANDOM.fill(&mut buf).is_err());
    }

    #[test]
    fn test_scopes_nest_and_restore() {
        let mut buf = [0u8; 4];
        {
            let _outer = RngScope::enter(Arc::new(Constant(1)));
            SESSION_RANDOM.fill(&mut buf).unwrap();
            assert_eq!(buf, [1; 4]);
            {
                let _inner = RngScope::enter(Arc::new(Constant(2)));
                SESSION_RANDOM.fill(&mut buf).unwrap();
                assert_eq!(buf, [2; 4]);
            }
            SESSION_RANDOM.fill(&mut buf).unwrap();
            assert_eq!(buf, [1; 4]);
        }
        assert!(SESSION_RANDOM.fill(&mut buf).is_err());
    }
}
