//! Core types shared across the context layer and the protocol engines

use k256::ecdsa;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Unique, stable identifier of a participant within one signer set
pub type ParticipantIndex = usize;

/// Unique identifier for a keygen or signing session
pub type SessionId = [u8; 32];

/// Secret keys, tweaks and message digests are 32 bytes, big-endian
pub const SCALAR_LEN: usize = 32;

/// Message digests are opaque 32-byte values; callers hash beforehand
pub const DIGEST_LEN: usize = 32;

/// Compressed SEC1 public key
pub const PUBKEY_COMPRESSED_LEN: usize = 33;

/// Uncompressed SEC1 public key
pub const PUBKEY_UNCOMPRESSED_LEN: usize = 65;

/// Schnorr signatures are `R.x || z`
pub const SCHNORR_SIG_LEN: usize = 64;

/// ECDSA signature in compact `(r, s)` form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcdsaSignature {
    /// R component
    pub r: [u8; 32],
    /// S component
    pub s: [u8; 32],
}

impl EcdsaSignature {
    /// Parse from compact 64-byte form
    pub fn from_compact(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 64 {
            return Err(Error::InvalidInputLength {
                what: "compact signature",
                len: bytes.len(),
            });
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(Self { r, s })
    }

    /// Convert to DER format
    pub fn to_der(&self) -> Result<Vec<u8>> {
        let sig = ecdsa::Signature::from_scalars(
            *k256::FieldBytes::from_slice(&self.r),
            *k256::FieldBytes::from_slice(&self.s),
        )
        .map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(sig.to_der().as_bytes().to_vec())
    }

    /// Convert to compact bytes (r || s)
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        bytes
    }
}

/// Configuration for one keygen or signing session.
///
/// The session id must be agreed out of band by all participants; how that
/// happens is up to the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session identifier, shared by every participant
    pub session_id: SessionId,

    /// Number of participants
    pub n_parties: usize,

    /// Threshold (t-of-n)
    pub threshold: usize,

    /// This participant's index
    pub party_id: ParticipantIndex,

    /// Indices of all participants
    pub parties: Vec<ParticipantIndex>,
}

impl SessionConfig {
    /// Create a new session configuration
    pub fn new(
        session_id: SessionId,
        n_parties: usize,
        threshold: usize,
        party_id: ParticipantIndex,
    ) -> Result<Self> {
        if threshold > n_parties {
            return Err(Error::InvalidConfig(
                "threshold cannot exceed number of parties".into(),
            ));
        }
        if threshold < 2 {
            return Err(Error::InvalidConfig("threshold must be at least 2".into()));
        }
        if party_id >= n_parties {
            return Err(Error::InvalidParticipant(party_id));
        }

        Ok(Self {
            session_id,
            n_parties,
            threshold,
            party_id,
            parties: (0..n_parties).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_rejects_bad_threshold() {
        assert!(SessionConfig::new([0u8; 32], 3, 4, 0).is_err());
        assert!(SessionConfig::new([0u8; 32], 3, 1, 0).is_err());
        assert!(SessionConfig::new([0u8; 32], 3, 2, 3).is_err());
        assert!(SessionConfig::new([0u8; 32], 3, 2, 2).is_ok());
    }

    #[test]
    fn compact_der_round_trip() {
        let mut compact = [0u8; 64];
        compact[31] = 7;
        compact[63] = 9;
        let sig = EcdsaSignature::from_compact(&compact).unwrap();
        assert_eq!(sig.to_bytes(), compact);
        let der = sig.to_der().unwrap();
        assert_eq!(der[0], 0x30);
    }
}
