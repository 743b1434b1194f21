//! Caller-owned scratch region carrying fixed-layout request bytes
//!
//! One [`Marshaler`] belongs to exactly one worker. Staging every request
//! through a reusable region keeps shared-lock concurrency on the context
//! free of per-call allocation without ever sharing buffers across threads.

use zeroize::Zeroize;

use crate::engine::EngineReply;
use crate::{Error, Result};

/// Reusable scratch region for staging engine requests.
///
/// Grows by reallocation when a call needs more room and never shrinks.
/// [`Marshaler::begin`] resets the write cursor so a smaller call can never
/// pick up trailing bytes of a previous, larger one.
#[derive(Debug)]
pub struct Marshaler {
    buf: Vec<u8>,
    len: usize,
}

impl Marshaler {
    /// Empty region; first `begin` sizes it
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            len: 0,
        }
    }

    /// Region pre-sized for the largest operation the owner expects
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            len: 0,
        }
    }

    /// Start a new request: reset the cursor and ensure `required` bytes fit
    pub fn begin(&mut self, required: usize) {
        if self.buf.len() < required {
            self.buf.resize(required, 0);
        }
        self.len = 0;
    }

    /// Append bytes at the cursor, growing if the caller under-declared
    pub fn put(&mut self, bytes: &[u8]) {
        let end = self.len + bytes.len();
        if self.buf.len() < end {
            self.buf.resize(end, 0);
        }
        self.buf[self.len..end].copy_from_slice(bytes);
        self.len = end;
    }

    /// Exactly the bytes written since the last `begin`
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Current region size; monotonically non-decreasing
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Unpack an engine `(payload, declared length, status)` triple.
    ///
    /// Status `0` is a declined operation and maps to `None`; a disagreement
    /// between declared and actual payload length is a contract violation
    /// with the engine and surfaces as [`Error::LengthMismatch`].
    pub fn unpack(&self, reply: EngineReply) -> Result<Option<Vec<u8>>> {
        if reply.declared_len != reply.payload.len() {
            return Err(Error::LengthMismatch {
                declared: reply.declared_len,
                actual: reply.payload.len(),
            });
        }
        if reply.status == 0 {
            return Ok(None);
        }
        Ok(Some(reply.payload))
    }
}

impl Default for Marshaler {
    fn default() -> Self {
        Self::new()
    }
}

// The region stages secret key bytes; scrub it when the worker is done.
impl Drop for Marshaler {
    fn drop(&mut self) {
        self.buf.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_resets_cursor() {
        let mut m = Marshaler::new();
        m.begin(64);
        m.put(&[1u8; 64]);
        assert_eq!(m.bytes().len(), 64);

        m.begin(16);
        m.put(&[2u8; 16]);
        // a smaller call sees only its own bytes, not leftovers
        assert_eq!(m.bytes(), &[2u8; 16]);
    }

    #[test]
    fn region_grows_and_never_shrinks() {
        let mut m = Marshaler::with_capacity(8);
        assert_eq!(m.capacity(), 8);
        m.begin(128);
        assert_eq!(m.capacity(), 128);
        m.begin(8);
        assert_eq!(m.capacity(), 128);
    }

    #[test]
    fn put_grows_on_underdeclared_requirement() {
        let mut m = Marshaler::new();
        m.begin(4);
        m.put(&[9u8; 32]);
        assert_eq!(m.bytes(), &[9u8; 32]);
    }

    #[test]
    fn unpack_declined_is_none() {
        let m = Marshaler::new();
        let reply = EngineReply {
            payload: Vec::new(),
            declared_len: 0,
            status: 0,
        };
        assert!(m.unpack(reply).unwrap().is_none());
    }

    #[test]
    fn unpack_length_disagreement_is_hard_error() {
        let m = Marshaler::new();
        let reply = EngineReply {
            payload: vec![0u8; 64],
            declared_len: 33,
            status: 1,
        };
        assert!(matches!(
            m.unpack(reply),
            Err(Error::LengthMismatch {
                declared: 33,
                actual: 64
            })
        ));
    }
}
