//! FROST-style threshold Schnorr signing
//!
//! [`keygen`] runs distributed key generation with verifiable secret sharing
//! (VSS); [`sign`] runs two-round threshold signing plus aggregation. Round
//! operations are pure functions from prior state and round input to new
//! state and round output; the session drivers compose them over a
//! [`Transport`](crate::mpc::Transport).

use std::collections::BTreeMap;
use std::fmt;

use k256::{ProjectivePoint, Scalar};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::engine;
use crate::types::{ParticipantIndex, SessionId};
use crate::{Error, Result};

pub mod keygen;
pub mod messages;
pub mod sign;

pub use keygen::{KeygenOutput, KeygenSession, KeygenState};
pub use sign::{SignSession, SignState};

/// A participant's private polynomial coefficients and, after key
/// generation round 1, its aggregated secret share.
///
/// Never serialized; never crosses a participant boundary.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct FrostSecret {
    index: ParticipantIndex,
    threshold: usize,
    #[zeroize(skip)]
    coefficients: Vec<Scalar>,
    #[zeroize(skip)]
    share: Option<Scalar>,
}

impl FrostSecret {
    pub(crate) fn new(
        index: ParticipantIndex,
        threshold: usize,
        coefficients: Vec<Scalar>,
    ) -> Self {
        Self {
            index,
            threshold,
            coefficients,
            share: None,
        }
    }

    /// Stable participant index this secret belongs to
    pub fn index(&self) -> ParticipantIndex {
        self.index
    }

    /// Threshold the polynomial was generated for
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Aggregated secret share, present once keygen round 1 completed
    pub(crate) fn share(&self) -> Result<&Scalar> {
        self.share.as_ref().ok_or_else(|| {
            Error::InvalidState {
                expected: "shares collected",
                actual: "no aggregated share",
            }
        })
    }

    pub(crate) fn with_share(self, share: Scalar) -> Self {
        Self {
            index: self.index,
            threshold: self.threshold,
            coefficients: self.coefficients.clone(),
            share: Some(share),
        }
    }

    /// Constant term of the polynomial; its commitment is the pubkey
    pub(crate) fn constant_term(&self) -> &Scalar {
        &self.coefficients[0]
    }

    /// Evaluate the secret polynomial at `x`
    pub(crate) fn evaluate(&self, x: u64) -> Scalar {
        let x = Scalar::from(x);
        let mut acc = Scalar::ZERO;
        let mut x_power = Scalar::ONE;
        for coefficient in &self.coefficients {
            acc += *coefficient * x_power;
            x_power *= x;
        }
        acc
    }

    pub(crate) fn coefficients(&self) -> &[Scalar] {
        &self.coefficients
    }
}

// Manual impl: the derived one would print the polynomial coefficients
// and the aggregated share.
impl fmt::Debug for FrostSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrostSecret")
            .field("index", &self.index)
            .field("threshold", &self.threshold)
            .field("share", &self.share.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Per-participant public record: stable index and long-term public key
#[derive(Debug, Clone)]
pub struct FrostSigner {
    /// Unique, stable index for the lifetime of the key
    pub index: ParticipantIndex,
    /// Compressed public key (commitment to the secret's constant term)
    pub pubkey: Vec<u8>,
}

/// Schnorr proof of knowledge over a participant's share material.
///
/// All participants of a keygen session share the same challenge, so proofs
/// combine additively into one aggregate proof.
#[derive(Debug, Clone, Copy)]
pub struct VssProof {
    pub(crate) r: ProjectivePoint,
    pub(crate) z: Scalar,
}

impl VssProof {
    /// 65-byte wire form: compressed `R` followed by `z`
    pub fn to_bytes(self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..33].copy_from_slice(&engine::compress(&self.r));
        out[33..].copy_from_slice(&self.z.to_bytes());
        out
    }

    /// Parse the 65-byte wire form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 65 {
            return Err(Error::InvalidInputLength {
                what: "vss proof",
                len: bytes.len(),
            });
        }
        let r = engine::parse_point(&bytes[..33])
            .ok_or_else(|| Error::Deserialization("invalid proof commitment".into()))?;
        let z = engine::parse_scalar(&bytes[33..])
            .ok_or_else(|| Error::Deserialization("invalid proof scalar".into()))?;
        Ok(Self { r, z })
    }
}

/// Transient accumulator of VSS proofs, bridging a receive round into the
/// aggregation that follows it. Write-once per participant.
#[derive(Debug, Clone, Default)]
pub struct FrostCache {
    proofs: BTreeMap<ParticipantIndex, VssProof>,
}

impl FrostCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one participant's proof; a second write for the same index is
    /// rejected
    pub(crate) fn insert(&mut self, from: ParticipantIndex, proof: VssProof) -> Result<()> {
        if self.proofs.insert(from, proof).is_some() {
            return Err(Error::VerificationFailed(format!(
                "duplicate vss proof from participant {from}"
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.proofs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proofs.is_empty()
    }

    /// Combine all recorded proofs into one
    pub(crate) fn combine(&self) -> Result<VssProof> {
        if self.proofs.is_empty() {
            return Err(Error::VerificationFailed("no vss proofs collected".into()));
        }
        let mut r = ProjectivePoint::IDENTITY;
        let mut z = Scalar::ZERO;
        for proof in self.proofs.values() {
            r += proof.r;
            z += proof.z;
        }
        Ok(VssProof { r, z })
    }
}

/// VSS material carried from key generation into every signing session:
/// the keygen session id the proofs were bound to, plus the proofs
/// themselves. Signing re-verifies them before trusting the group key.
#[derive(Debug, Clone)]
pub struct VssArtifacts {
    pub(crate) session_id: SessionId,
    pub(crate) cache: FrostCache,
}

impl VssArtifacts {
    pub(crate) fn new(session_id: SessionId, cache: FrostCache) -> Self {
        Self { session_id, cache }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_debug_redacts_key_material() {
        let secret = FrostSecret::new(0, 2, vec![Scalar::from(7u64), Scalar::from(9u64)])
            .with_share(Scalar::from(11u64));
        let rendered = format!("{secret:?}");
        assert!(rendered.contains("FrostSecret"));
        assert!(rendered.contains("redacted"));
        assert!(!rendered.contains("coefficients"));
        assert!(!rendered.contains("Scalar"));
    }
}
