//! Single-party primitive wrappers
//!
//! Each wrapper validates input lengths, stages the request through the
//! caller's [`Marshaler`], executes under a shared context guard and unpacks
//! the reply triple. A declined operation (out-of-range key, point at
//! infinity, failed verification) comes back as `Ok(None)` or `Ok(false)`.

use crate::engine::{self, EngineOp};
use crate::marshal::Marshaler;
use crate::types::{DIGEST_LEN, SCALAR_LEN, SCHNORR_SIG_LEN};
use crate::{CryptoContext, Error, Result};

fn check_len(what: &'static str, bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() != expected {
        return Err(Error::InvalidInputLength {
            what,
            len: bytes.len(),
        });
    }
    Ok(())
}

fn check_pubkey_len(pubkey: &[u8]) -> Result<()> {
    if pubkey.len() != 33 && pubkey.len() != 65 {
        return Err(Error::InvalidInputLength {
            what: "public key",
            len: pubkey.len(),
        });
    }
    Ok(())
}

/// Create a deterministic ECDSA signature over a 32-byte digest.
///
/// Returns the compact 64-byte signature, or `None` for an invalid key.
pub fn sign(
    ctx: &CryptoContext,
    scratch: &mut Marshaler,
    digest: &[u8],
    seckey: &[u8],
) -> Result<Option<Vec<u8>>> {
    check_len("digest", digest, DIGEST_LEN)?;
    check_len("secret key", seckey, SCALAR_LEN)?;

    let shared = ctx.acquire_shared()?;
    scratch.begin(DIGEST_LEN + SCALAR_LEN);
    scratch.put(digest);
    scratch.put(seckey);
    let reply = engine::execute(shared.params(), EngineOp::EcdsaSign, scratch.bytes());
    scratch.unpack(reply)
}

/// Verify an ECDSA signature (compact or DER) over a 32-byte digest
pub fn verify(
    ctx: &CryptoContext,
    scratch: &mut Marshaler,
    digest: &[u8],
    signature: &[u8],
    pubkey: &[u8],
) -> Result<bool> {
    check_len("digest", digest, DIGEST_LEN)?;
    if signature.is_empty() || signature.len() > 72 {
        return Err(Error::InvalidInputLength {
            what: "signature",
            len: signature.len(),
        });
    }
    check_pubkey_len(pubkey)?;

    let shared = ctx.acquire_shared()?;
    scratch.begin(DIGEST_LEN + signature.len() + pubkey.len());
    scratch.put(digest);
    scratch.put(signature);
    scratch.put(pubkey);
    let op = EngineOp::EcdsaVerify {
        sig_len: signature.len(),
        pub_len: pubkey.len(),
    };
    let reply = engine::execute(shared.params(), op, scratch.bytes());
    Ok(scratch.unpack(reply)?.is_some())
}

/// True iff the key, as a big-endian integer, lies in `[1, n - 1]`
pub fn seckey_verify(ctx: &CryptoContext, scratch: &mut Marshaler, seckey: &[u8]) -> Result<bool> {
    check_len("secret key", seckey, SCALAR_LEN)?;

    let shared = ctx.acquire_shared()?;
    scratch.begin(SCALAR_LEN);
    scratch.put(seckey);
    let reply = engine::execute(shared.params(), EngineOp::SeckeyVerify, scratch.bytes());
    Ok(scratch.unpack(reply)?.is_some())
}

/// Compute the compressed public key for a secret key
pub fn compute_pubkey(
    ctx: &CryptoContext,
    scratch: &mut Marshaler,
    seckey: &[u8],
) -> Result<Option<Vec<u8>>> {
    check_len("secret key", seckey, SCALAR_LEN)?;

    let shared = ctx.acquire_shared()?;
    scratch.begin(SCALAR_LEN);
    scratch.put(seckey);
    let reply = engine::execute(shared.params(), EngineOp::PubkeyCreate, scratch.bytes());
    scratch.unpack(reply)
}

fn priv_tweak(
    ctx: &CryptoContext,
    scratch: &mut Marshaler,
    seckey: &[u8],
    tweak: &[u8],
    op: EngineOp,
) -> Result<Option<Vec<u8>>> {
    check_len("secret key", seckey, SCALAR_LEN)?;
    check_len("tweak", tweak, SCALAR_LEN)?;

    let shared = ctx.acquire_shared()?;
    scratch.begin(2 * SCALAR_LEN);
    scratch.put(seckey);
    scratch.put(tweak);
    let reply = engine::execute(shared.params(), op, scratch.bytes());
    scratch.unpack(reply)
}

/// Tweak a secret key by adding a scalar to it
pub fn priv_tweak_add(
    ctx: &CryptoContext,
    scratch: &mut Marshaler,
    seckey: &[u8],
    tweak: &[u8],
) -> Result<Option<Vec<u8>>> {
    priv_tweak(ctx, scratch, seckey, tweak, EngineOp::PrivTweakAdd)
}

/// Tweak a secret key by multiplying it by a scalar
pub fn priv_tweak_mul(
    ctx: &CryptoContext,
    scratch: &mut Marshaler,
    seckey: &[u8],
    tweak: &[u8],
) -> Result<Option<Vec<u8>>> {
    priv_tweak(ctx, scratch, seckey, tweak, EngineOp::PrivTweakMul)
}

fn pub_tweak(
    ctx: &CryptoContext,
    scratch: &mut Marshaler,
    pubkey: &[u8],
    tweak: &[u8],
    add: bool,
) -> Result<Option<Vec<u8>>> {
    check_pubkey_len(pubkey)?;
    check_len("tweak", tweak, SCALAR_LEN)?;

    let shared = ctx.acquire_shared()?;
    scratch.begin(pubkey.len() + SCALAR_LEN);
    scratch.put(pubkey);
    scratch.put(tweak);
    let op = if add {
        EngineOp::PubTweakAdd {
            pub_len: pubkey.len(),
        }
    } else {
        EngineOp::PubTweakMul {
            pub_len: pubkey.len(),
        }
    };
    let reply = engine::execute(shared.params(), op, scratch.bytes());
    scratch.unpack(reply)
}

/// Tweak a public key by adding `tweak * G` to it
pub fn pub_tweak_add(
    ctx: &CryptoContext,
    scratch: &mut Marshaler,
    pubkey: &[u8],
    tweak: &[u8],
) -> Result<Option<Vec<u8>>> {
    pub_tweak(ctx, scratch, pubkey, tweak, true)
}

/// Tweak a public key by multiplying it by a scalar
pub fn pub_tweak_mul(
    ctx: &CryptoContext,
    scratch: &mut Marshaler,
    pubkey: &[u8],
    tweak: &[u8],
) -> Result<Option<Vec<u8>>> {
    pub_tweak(ctx, scratch, pubkey, tweak, false)
}

/// Constant-time ECDH: 32-byte shared secret from a secret and a public key
pub fn ecdh(
    ctx: &CryptoContext,
    scratch: &mut Marshaler,
    seckey: &[u8],
    pubkey: &[u8],
) -> Result<Option<Vec<u8>>> {
    check_len("secret key", seckey, SCALAR_LEN)?;
    check_pubkey_len(pubkey)?;

    let shared = ctx.acquire_shared()?;
    scratch.begin(SCALAR_LEN + pubkey.len());
    scratch.put(seckey);
    scratch.put(pubkey);
    let op = EngineOp::Ecdh {
        pub_len: pubkey.len(),
    };
    let reply = engine::execute(shared.params(), op, scratch.bytes());
    scratch.unpack(reply)
}

/// Single-party Schnorr signature (64 bytes), or `None` for an invalid key.
///
/// The output verifies under [`schnorr_verify`] and under the threshold
/// verifier, which share the same verification semantics.
pub fn schnorr_sign(
    ctx: &CryptoContext,
    scratch: &mut Marshaler,
    digest: &[u8],
    seckey: &[u8],
) -> Result<Option<Vec<u8>>> {
    check_len("digest", digest, DIGEST_LEN)?;
    check_len("secret key", seckey, SCALAR_LEN)?;

    let shared = ctx.acquire_shared()?;
    scratch.begin(DIGEST_LEN + SCALAR_LEN);
    scratch.put(digest);
    scratch.put(seckey);
    let reply = engine::execute(shared.params(), EngineOp::SchnorrSign, scratch.bytes());
    scratch.unpack(reply)
}

/// Verify a 64-byte Schnorr signature over a 32-byte digest
pub fn schnorr_verify(
    ctx: &CryptoContext,
    scratch: &mut Marshaler,
    signature: &[u8],
    digest: &[u8],
    pubkey: &[u8],
) -> Result<bool> {
    check_len("signature", signature, SCHNORR_SIG_LEN)?;
    check_len("digest", digest, DIGEST_LEN)?;
    check_pubkey_len(pubkey)?;

    let shared = ctx.acquire_shared()?;
    scratch.begin(DIGEST_LEN + SCHNORR_SIG_LEN + pubkey.len());
    scratch.put(digest);
    scratch.put(signature);
    scratch.put(pubkey);
    let op = EngineOp::SchnorrVerify {
        pub_len: pubkey.len(),
    };
    let reply = engine::execute(shared.params(), op, scratch.bytes());
    Ok(scratch.unpack(reply)?.is_some())
}
