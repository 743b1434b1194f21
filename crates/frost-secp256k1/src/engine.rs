//! Byte-level boundary to the curve primitive engine
//!
//! Requests arrive as fixed-layout byte regions staged by a
//! [`Marshaler`](crate::marshal::Marshaler) and come back as a
//! `(payload, declared length, status)` triple. Status `0` means the engine
//! declined the operation (invalid scalar, point at infinity, failed
//! verification); it is an expected outcome, not a crash. All curve
//! arithmetic is delegated to `k256`.

use k256::{
    ecdsa::{
        signature::hazmat::{PrehashSigner, PrehashVerifier},
        Signature as EcdsaSig, SigningKey, VerifyingKey,
    },
    elliptic_curve::{
        bigint::U256,
        ops::Reduce,
        point::DecompressPoint,
        sec1::{FromEncodedPoint, ToEncodedPoint},
        Group, PrimeField,
    },
    AffinePoint, EncodedPoint, ProjectivePoint, Scalar,
};
use sha2::{Digest, Sha256};
use subtle::Choice;

use crate::context::ContextParams;
use crate::types::{PUBKEY_COMPRESSED_LEN, SCALAR_LEN, SCHNORR_SIG_LEN};

/// Result triple of one engine call
#[derive(Debug)]
pub struct EngineReply {
    /// Result bytes; empty when the operation was declined
    pub payload: Vec<u8>,
    /// Length the engine claims to have produced
    pub declared_len: usize,
    /// `0` declined, `1` accepted
    pub status: u8,
}

impl EngineReply {
    fn ok(payload: Vec<u8>) -> Self {
        let declared_len = payload.len();
        Self {
            payload,
            declared_len,
            status: 1,
        }
    }

    fn declined() -> Self {
        Self {
            payload: Vec::new(),
            declared_len: 0,
            status: 0,
        }
    }

    fn verdict(accepted: bool) -> Self {
        Self {
            payload: Vec::new(),
            declared_len: 0,
            status: u8::from(accepted),
        }
    }
}

/// Operations the engine understands. Variable-length trailing fields carry
/// their lengths here, mirroring how the request region is laid out.
#[derive(Debug, Clone, Copy)]
pub(crate) enum EngineOp {
    SeckeyVerify,
    PubkeyCreate,
    EcdsaSign,
    EcdsaVerify { sig_len: usize, pub_len: usize },
    PrivTweakAdd,
    PrivTweakMul,
    PubTweakAdd { pub_len: usize },
    PubTweakMul { pub_len: usize },
    Ecdh { pub_len: usize },
    SchnorrSign,
    SchnorrVerify { pub_len: usize },
}

fn required_len(op: EngineOp) -> usize {
    match op {
        EngineOp::SeckeyVerify | EngineOp::PubkeyCreate => SCALAR_LEN,
        EngineOp::EcdsaSign | EngineOp::SchnorrSign => 2 * SCALAR_LEN,
        EngineOp::EcdsaVerify { sig_len, pub_len } => 32 + sig_len + pub_len,
        EngineOp::PrivTweakAdd | EngineOp::PrivTweakMul => 2 * SCALAR_LEN,
        EngineOp::PubTweakAdd { pub_len } | EngineOp::PubTweakMul { pub_len } => pub_len + 32,
        EngineOp::Ecdh { pub_len } => 32 + pub_len,
        EngineOp::SchnorrVerify { pub_len } => 32 + SCHNORR_SIG_LEN + pub_len,
    }
}

/// Execute one primitive operation over a staged request region
pub(crate) fn execute(params: &ContextParams, op: EngineOp, request: &[u8]) -> EngineReply {
    if request.len() < required_len(op) {
        return EngineReply::declined();
    }
    match op {
        EngineOp::SeckeyVerify => {
            EngineReply::verdict(parse_seckey(&request[..SCALAR_LEN]).is_some())
        }
        EngineOp::PubkeyCreate => match parse_seckey(&request[..SCALAR_LEN]) {
            Some(sec) => EngineReply::ok(compress(&(ProjectivePoint::GENERATOR * sec)).to_vec()),
            None => EngineReply::declined(),
        },
        EngineOp::EcdsaSign => ecdsa_sign(&request[..SCALAR_LEN], &request[SCALAR_LEN..64]),
        EngineOp::EcdsaVerify { sig_len, pub_len } => {
            let sig = &request[32..32 + sig_len];
            let pubkey = &request[32 + sig_len..32 + sig_len + pub_len];
            EngineReply::verdict(ecdsa_verify(&request[..32], sig, pubkey))
        }
        EngineOp::PrivTweakAdd => priv_tweak(&request[..32], &request[32..64], TweakKind::Add),
        EngineOp::PrivTweakMul => priv_tweak(&request[..32], &request[32..64], TweakKind::Mul),
        EngineOp::PubTweakAdd { pub_len } => {
            pub_tweak(&request[..pub_len], &request[pub_len..pub_len + 32], TweakKind::Add)
        }
        EngineOp::PubTweakMul { pub_len } => {
            pub_tweak(&request[..pub_len], &request[pub_len..pub_len + 32], TweakKind::Mul)
        }
        EngineOp::Ecdh { pub_len } => ecdh(&request[..32], &request[32..32 + pub_len]),
        EngineOp::SchnorrSign => {
            let digest: [u8; 32] = match request[..32].try_into() {
                Ok(d) => d,
                Err(_) => return EngineReply::declined(),
            };
            let sec = match parse_seckey(&request[32..64]) {
                Some(s) => s,
                None => return EngineReply::declined(),
            };
            match schnorr_sign(params, &digest, &sec) {
                Some(sig) => EngineReply::ok(sig.to_vec()),
                None => EngineReply::declined(),
            }
        }
        EngineOp::SchnorrVerify { pub_len } => {
            let sig = &request[32..32 + SCHNORR_SIG_LEN];
            let pubkey = &request[96..96 + pub_len];
            EngineReply::verdict(schnorr_verify(sig, &request[..32], pubkey))
        }
    }
}

#[derive(Clone, Copy)]
enum TweakKind {
    Add,
    Mul,
}

fn ecdsa_sign(digest: &[u8], seckey: &[u8]) -> EngineReply {
    let key = match SigningKey::from_bytes(k256::FieldBytes::from_slice(seckey)) {
        Ok(key) => key,
        Err(_) => return EngineReply::declined(),
    };
    let sig: EcdsaSig = match key.sign_prehash(digest) {
        Ok(sig) => sig,
        Err(_) => return EngineReply::declined(),
    };
    EngineReply::ok(sig.to_bytes().to_vec())
}

fn ecdsa_verify(digest: &[u8], sig: &[u8], pubkey: &[u8]) -> bool {
    let key = match VerifyingKey::from_sec1_bytes(pubkey) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let sig = match EcdsaSig::from_slice(sig).or_else(|_| EcdsaSig::from_der(sig)) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    key.verify_prehash(digest, &sig).is_ok()
}

fn priv_tweak(seckey: &[u8], tweak: &[u8], kind: TweakKind) -> EngineReply {
    let sec = match parse_seckey(seckey) {
        Some(s) => s,
        None => return EngineReply::declined(),
    };
    let t = match parse_scalar(tweak) {
        Some(t) => t,
        None => return EngineReply::declined(),
    };
    let out = match kind {
        TweakKind::Add => sec + t,
        TweakKind::Mul => {
            if bool::from(t.is_zero()) {
                return EngineReply::declined();
            }
            sec * t
        }
    };
    if bool::from(out.is_zero()) {
        return EngineReply::declined();
    }
    EngineReply::ok(out.to_bytes().to_vec())
}

fn pub_tweak(pubkey: &[u8], tweak: &[u8], kind: TweakKind) -> EngineReply {
    let uncompressed = pubkey.len() == 65;
    let point = match parse_point(pubkey) {
        Some(p) => p,
        None => return EngineReply::declined(),
    };
    let t = match parse_scalar(tweak) {
        Some(t) => t,
        None => return EngineReply::declined(),
    };
    let out = match kind {
        TweakKind::Add => point + ProjectivePoint::GENERATOR * t,
        TweakKind::Mul => {
            if bool::from(t.is_zero()) {
                return EngineReply::declined();
            }
            point * t
        }
    };
    if bool::from(out.is_identity()) {
        return EngineReply::declined();
    }
    EngineReply::ok(encode_point(&out, !uncompressed))
}

fn ecdh(seckey: &[u8], pubkey: &[u8]) -> EngineReply {
    let sec = match parse_seckey(seckey) {
        Some(s) => s,
        None => return EngineReply::declined(),
    };
    let point = match parse_point(pubkey) {
        Some(p) => p,
        None => return EngineReply::declined(),
    };
    let shared = point * sec;
    // libsecp semantics: the shared secret is the hash of the compressed point
    let mut hasher = Sha256::new();
    hasher.update(compress(&shared));
    EngineReply::ok(hasher.finalize().to_vec())
}

/// Deterministic Schnorr signature `R.x || z` with even-y nonce commitment.
///
/// The nonce folds in the context randomization seed, so two contexts never
/// derive the same nonce for the same key and message.
fn schnorr_sign(params: &ContextParams, digest: &[u8; 32], seckey: &Scalar) -> Option<[u8; 64]> {
    let pubkey = compress(&(ProjectivePoint::GENERATOR * seckey));
    let sec_bytes = seckey.to_bytes();
    let mut d = hash_to_scalar(&[
        b"frost-secp256k1/nonce",
        params.randomization(),
        sec_bytes.as_slice(),
        digest,
    ]);
    if bool::from(d.is_zero()) {
        return None;
    }
    let r_enc = compress(&(ProjectivePoint::GENERATOR * d));
    if r_enc[0] == 0x03 {
        d = -d;
    }
    let mut r_x = [0u8; 32];
    r_x.copy_from_slice(&r_enc[1..]);
    let c = schnorr_challenge(&r_x, &pubkey, digest);
    let z = d + c * seckey;

    let mut sig = [0u8; 64];
    sig[..32].copy_from_slice(&r_x);
    sig[32..].copy_from_slice(&z.to_bytes());
    Some(sig)
}

/// Schnorr verification shared by the single-party path and FROST
pub(crate) fn schnorr_verify(sig: &[u8], msg: &[u8], pubkey: &[u8]) -> bool {
    if sig.len() != SCHNORR_SIG_LEN {
        return false;
    }
    let point = match parse_point(pubkey) {
        Some(p) => p,
        None => return false,
    };
    let mut r_x = [0u8; 32];
    r_x.copy_from_slice(&sig[..32]);
    let z = match parse_scalar(&sig[32..]) {
        Some(z) => z,
        None => return false,
    };
    let r_point = match lift_x(&r_x) {
        Some(r) => r,
        None => return false,
    };
    let c = schnorr_challenge(&r_x, &compress(&point), msg);
    ProjectivePoint::GENERATOR * z == r_point + point * c
}

/// Challenge scalar binding the nonce commitment, public key and message
pub(crate) fn schnorr_challenge(r_x: &[u8; 32], pubkey: &[u8; 33], msg: &[u8]) -> Scalar {
    hash_to_scalar(&[b"frost-secp256k1/challenge", r_x, pubkey, msg])
}

/// Hash the concatenation of `parts` and reduce into the scalar field
pub(crate) fn hash_to_scalar(parts: &[&[u8]]) -> Scalar {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest: [u8; 32] = hasher.finalize().into();
    <Scalar as Reduce<U256>>::reduce_bytes(&digest.into())
}

/// Canonical scalar, i.e. a big-endian integer in `[0, n - 1]`
pub(crate) fn parse_scalar(bytes: &[u8]) -> Option<Scalar> {
    let arr: [u8; SCALAR_LEN] = bytes.try_into().ok()?;
    Option::from(Scalar::from_repr(arr.into()))
}

/// Valid secret key: canonical and non-zero, i.e. in `[1, n - 1]`
pub(crate) fn parse_seckey(bytes: &[u8]) -> Option<Scalar> {
    parse_scalar(bytes).filter(|s| !bool::from(s.is_zero()))
}

/// SEC1 point that is on the curve and not the identity
pub(crate) fn parse_point(bytes: &[u8]) -> Option<ProjectivePoint> {
    let encoded = EncodedPoint::from_bytes(bytes).ok()?;
    let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))?;
    let point = ProjectivePoint::from(affine);
    if bool::from(point.is_identity()) {
        return None;
    }
    Some(point)
}

/// Compressed 33-byte encoding. The point must not be the identity.
pub(crate) fn compress(point: &ProjectivePoint) -> [u8; PUBKEY_COMPRESSED_LEN] {
    let encoded = point.to_affine().to_encoded_point(true);
    let mut out = [0u8; PUBKEY_COMPRESSED_LEN];
    out.copy_from_slice(encoded.as_bytes());
    out
}

fn encode_point(point: &ProjectivePoint, compressed: bool) -> Vec<u8> {
    point
        .to_affine()
        .to_encoded_point(compressed)
        .as_bytes()
        .to_vec()
}

/// Decompress an x-only coordinate to the even-y point
pub(crate) fn lift_x(x: &[u8; 32]) -> Option<ProjectivePoint> {
    let bytes = k256::FieldBytes::from(*x);
    let affine = Option::<AffinePoint>::from(AffinePoint::decompress(&bytes, Choice::from(0)))?;
    Some(ProjectivePoint::from(affine))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lift_x_recovers_even_y_point() {
        let sec = Scalar::from(42u64);
        let point = ProjectivePoint::GENERATOR * sec;
        let enc = compress(&point);
        let mut x = [0u8; 32];
        x.copy_from_slice(&enc[1..]);

        let lifted = lift_x(&x).unwrap();
        let expected = if enc[0] == 0x02 { point } else { -point };
        assert_eq!(lifted, expected);
    }

    #[test]
    fn schnorr_sign_verify_inner() {
        let params = crate::CryptoContext::new();
        let shared = params.acquire_shared().unwrap();
        let sec = Scalar::from(123456789u64);
        let digest = [0x5au8; 32];

        let sig = schnorr_sign(shared.params(), &digest, &sec).unwrap();
        let pubkey = compress(&(ProjectivePoint::GENERATOR * sec));
        assert!(schnorr_verify(&sig, &digest, &pubkey));
        assert!(!schnorr_verify(&sig, &[0u8; 32], &pubkey));
    }

    #[test]
    fn parse_seckey_rejects_zero_and_overflow() {
        assert!(parse_seckey(&[0u8; 32]).is_none());
        assert!(parse_seckey(&[0xffu8; 32]).is_none());
        let mut one = [0u8; 32];
        one[31] = 1;
        assert!(parse_seckey(&one).is_some());
    }
}
