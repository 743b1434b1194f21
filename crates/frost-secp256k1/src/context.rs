//! Process-wide crypto context and its shared/exclusive access discipline
//!
//! Every primitive and protocol operation goes through a [`CryptoContext`]
//! guard. Signing, verification, tweaks, ECDH and the FROST round functions
//! only read the context and take the shared path; `randomize` and `destroy`
//! mutate it and take the exclusive path. A destroyed context refuses all
//! further acquisitions with [`Error::ContextUnavailable`] instead of
//! touching freed state.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Curve parameters and randomization state behind the lock
#[derive(Debug, Clone)]
pub struct ContextParams {
    randomization: [u8; 32],
}

impl ContextParams {
    fn fresh() -> Self {
        let mut randomization = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut randomization);
        Self { randomization }
    }

    /// Current randomization seed, mixed into deterministic nonce derivation
    pub fn randomization(&self) -> &[u8; 32] {
        &self.randomization
    }
}

#[derive(Debug)]
enum State {
    Ready(ContextParams),
    Destroyed,
}

/// Handle to initialized curve parameters and randomization state.
///
/// One instance is shared by every engine in the process; independent worker
/// lineages get their own via [`CryptoContext::clone_context`]. Clones do
/// not share randomization state.
#[derive(Debug)]
pub struct CryptoContext {
    state: RwLock<State>,
}

/// Scoped shared (read) access to the context
pub struct SharedContext<'a> {
    guard: RwLockReadGuard<'a, State>,
}

impl SharedContext<'_> {
    /// Context parameters; valid for the lifetime of the guard
    pub fn params(&self) -> &ContextParams {
        match &*self.guard {
            State::Ready(params) => params,
            // acquire_shared only hands out guards over a ready context and
            // destruction needs the write lock we are blocking
            State::Destroyed => unreachable!("shared guard over destroyed context"),
        }
    }
}

/// Scoped exclusive (write) access to the context
pub struct ExclusiveContext<'a> {
    guard: RwLockWriteGuard<'a, State>,
}

impl ExclusiveContext<'_> {
    fn params_mut(&mut self) -> &mut ContextParams {
        match &mut *self.guard {
            State::Ready(params) => params,
            State::Destroyed => unreachable!("exclusive guard over destroyed context"),
        }
    }
}

impl CryptoContext {
    /// Create a ready context with a fresh randomization seed
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::Ready(ContextParams::fresh())),
        }
    }

    /// Acquire shared access for a read-only operation.
    ///
    /// Blocks while an exclusive holder runs. Exclusive requests may starve
    /// under sustained shared load; randomize/destroy are rare enough that
    /// this is accepted.
    pub fn acquire_shared(&self) -> Result<SharedContext<'_>> {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match *guard {
            State::Ready(_) => Ok(SharedContext { guard }),
            State::Destroyed => Err(Error::ContextUnavailable),
        }
    }

    /// Acquire exclusive access; blocks until all shared holders release
    pub fn acquire_exclusive(&self) -> Result<ExclusiveContext<'_>> {
        let guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match *guard {
            State::Ready(_) => Ok(ExclusiveContext { guard }),
            State::Destroyed => Err(Error::ContextUnavailable),
        }
    }

    /// Update the context randomization from a 32-byte seed.
    ///
    /// The new state mixes the previous seed with the caller's, so repeated
    /// randomization never reverts to an earlier state.
    pub fn randomize(&self, seed: &[u8]) -> Result<bool> {
        if seed.len() != 32 {
            return Err(Error::InvalidInputLength {
                what: "randomization seed",
                len: seed.len(),
            });
        }
        let mut ctx = self.acquire_exclusive()?;
        let params = ctx.params_mut();
        let mut hasher = Sha256::new();
        hasher.update(b"frost-secp256k1/randomize");
        hasher.update(params.randomization);
        hasher.update(seed);
        params.randomization = hasher.finalize().into();
        Ok(true)
    }

    /// Destroy the context. Every subsequent acquisition fails with
    /// [`Error::ContextUnavailable`], including a second destroy.
    pub fn destroy(&self) -> Result<()> {
        let mut ctx = self.acquire_exclusive()?;
        *ctx.guard = State::Destroyed;
        Ok(())
    }

    /// New independent handle for a separate worker lineage.
    ///
    /// The clone starts from a fresh randomization seed; it does not track
    /// later randomization of the original.
    pub fn clone_context(&self) -> Result<CryptoContext> {
        let _shared = self.acquire_shared()?;
        Ok(CryptoContext::new())
    }
}

impl Default for CryptoContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_access_after_destroy_fails() {
        let ctx = CryptoContext::new();
        ctx.destroy().unwrap();
        assert!(matches!(
            ctx.acquire_shared(),
            Err(Error::ContextUnavailable)
        ));
        assert!(matches!(
            ctx.acquire_exclusive(),
            Err(Error::ContextUnavailable)
        ));
        assert!(matches!(ctx.destroy(), Err(Error::ContextUnavailable)));
        assert!(matches!(
            ctx.randomize(&[0u8; 32]),
            Err(Error::ContextUnavailable)
        ));
    }

    #[test]
    fn randomize_replaces_seed() {
        let ctx = CryptoContext::new();
        let before = *ctx.acquire_shared().unwrap().params().randomization();
        assert!(ctx.randomize(&[7u8; 32]).unwrap());
        let after = *ctx.acquire_shared().unwrap().params().randomization();
        assert_ne!(before, after);
    }

    #[test]
    fn randomize_rejects_short_seed() {
        let ctx = CryptoContext::new();
        assert!(matches!(
            ctx.randomize(&[0u8; 16]),
            Err(Error::InvalidInputLength { .. })
        ));
    }

    #[test]
    fn clone_is_independent() {
        let ctx = CryptoContext::new();
        let clone = ctx.clone_context().unwrap();
        ctx.destroy().unwrap();
        // the clone outlives the original and has its own seed
        assert!(clone.acquire_shared().is_ok());
        assert!(matches!(
            ctx.clone_context(),
            Err(Error::ContextUnavailable)
        ));
    }

    #[test]
    fn concurrent_shared_readers() {
        use std::sync::Arc;

        let ctx = Arc::new(CryptoContext::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let shared = ctx.acquire_shared().unwrap();
                        assert_eq!(shared.params().randomization().len(), 32);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
