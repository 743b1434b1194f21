//! Distributed key generation with verifiable secret sharing
//!
//! Two rounds: participants first exchange Shamir shares of their secret
//! polynomials (each share wrapped with the sender's coefficient
//! commitments, Feldman style), then broadcast proofs of knowledge that
//! aggregate into one proof verifiable against the group public key. A bad
//! share or proof aborts the instance; an aborted instance can never yield
//! a group key.

use k256::{
    elliptic_curve::{Field, Group},
    ProjectivePoint, Scalar,
};
use rand::rngs::OsRng;
use tracing::{debug, info, instrument, warn};

use crate::engine;
use crate::marshal::Marshaler;
use crate::mpc::Transport;
use crate::types::{ParticipantIndex, SessionConfig, SessionId, PUBKEY_COMPRESSED_LEN, SCALAR_LEN};
use crate::{CryptoContext, Error, Result};

use super::messages::{RegisterMessage, ShareMessage, VssProofMessage};
use super::{FrostCache, FrostSecret, FrostSigner, VssArtifacts, VssProof};

const REGISTER_ROUND: u32 = 0;
const SHARE_ROUND: u32 = 1;
const PROOF_ROUND: u32 = 2;

/// States of one key generation instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeygenState {
    Init,
    SharesSent,
    SharesCollected,
    VssSent,
    VssVerified,
    Aborted,
}

impl KeygenState {
    fn name(self) -> &'static str {
        match self {
            KeygenState::Init => "init",
            KeygenState::SharesSent => "shares sent",
            KeygenState::SharesCollected => "shares collected",
            KeygenState::VssSent => "vss sent",
            KeygenState::VssVerified => "vss verified",
            KeygenState::Aborted => "aborted",
        }
    }
}

/// Round-scoped state of one key generation instance
#[derive(Debug)]
pub struct KeygenSession {
    id: SessionId,
    threshold: usize,
    n_parties: usize,
    state: KeygenState,
}

impl KeygenSession {
    /// New instance in `Init`
    pub fn new(id: SessionId, threshold: usize, n_parties: usize) -> Result<Self> {
        if threshold < 2 || threshold > n_parties {
            return Err(Error::InvalidConfig(format!(
                "threshold {threshold} out of range for {n_parties} parties"
            )));
        }
        Ok(Self {
            id,
            threshold,
            n_parties,
            state: KeygenState::Init,
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> KeygenState {
        self.state
    }

    fn advance(&mut self, expected: KeygenState, next: KeygenState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            });
        }
        self.state = next;
        Ok(())
    }

    fn abort(&mut self) {
        self.state = KeygenState::Aborted;
    }

    /// Close the instance after VSS verification
    pub fn complete(&mut self, verified: bool) -> Result<()> {
        if verified {
            self.advance(KeygenState::VssSent, KeygenState::VssVerified)
        } else {
            self.abort();
            Err(Error::ProtocolAborted("vss verification failed".into()))
        }
    }
}

/// Derive a secret polynomial of degree `threshold - 1` and the matching
/// signer record. Purely local; the caller supplies the transport.
pub fn generate_key(
    ctx: &CryptoContext,
    threshold: usize,
    index: ParticipantIndex,
) -> Result<(FrostSecret, FrostSigner)> {
    if threshold < 2 {
        return Err(Error::InvalidConfig("threshold must be at least 2".into()));
    }
    let _shared = ctx.acquire_shared()?;

    let mut coefficients = Vec::with_capacity(threshold);
    for _ in 0..threshold {
        let mut coefficient = Scalar::random(&mut OsRng);
        while bool::from(coefficient.is_zero()) {
            coefficient = Scalar::random(&mut OsRng);
        }
        coefficients.push(coefficient);
    }

    let pubkey = engine::compress(&(ProjectivePoint::GENERATOR * coefficients[0]));
    let secret = FrostSecret::new(index, threshold, coefficients);
    let signer = FrostSigner {
        index,
        pubkey: pubkey.to_vec(),
    };
    Ok((secret, signer))
}

/// Keygen round 1, send half: one VSS-wrapped share blob per peer.
///
/// Each blob packs the polynomial evaluation at the peer's index together
/// with the sender's coefficient commitments, staged through the caller's
/// scratch region.
pub fn round1_shares(
    ctx: &CryptoContext,
    scratch: &mut Marshaler,
    session: &mut KeygenSession,
    secret: &FrostSecret,
    signers: &[FrostSigner],
) -> Result<Vec<ShareMessage>> {
    // validate before touching the state machine so a bad signer set does
    // not strand the session in `SharesSent`
    if signers.len() != session.n_parties {
        return Err(Error::InvalidConfig(format!(
            "expected {} signers, got {}",
            session.n_parties,
            signers.len()
        )));
    }
    session.advance(KeygenState::Init, KeygenState::SharesSent)?;
    let _shared = ctx.acquire_shared()?;

    let commitments: Vec<[u8; 33]> = secret
        .coefficients()
        .iter()
        .map(|c| engine::compress(&(ProjectivePoint::GENERATOR * c)))
        .collect();

    let mut out = Vec::with_capacity(signers.len() - 1);
    for signer in signers {
        if signer.index == secret.index() {
            continue;
        }
        let evaluation = secret.evaluate(signer.index as u64 + 1);
        scratch.begin(SCALAR_LEN + commitments.len() * PUBKEY_COMPRESSED_LEN);
        scratch.put(&evaluation.to_bytes());
        for commitment in &commitments {
            scratch.put(commitment);
        }
        out.push(ShareMessage {
            from: secret.index(),
            to: signer.index,
            blob: scratch.bytes().to_vec(),
        });
    }
    Ok(out)
}

struct ParsedShare {
    evaluation: Scalar,
    commitments: Vec<ProjectivePoint>,
}

fn parse_share_blob(blob: &[u8], threshold: usize) -> Result<ParsedShare> {
    let expected = SCALAR_LEN + threshold * PUBKEY_COMPRESSED_LEN;
    if blob.len() != expected {
        return Err(Error::InvalidInputLength {
            what: "share blob",
            len: blob.len(),
        });
    }
    let evaluation = engine::parse_scalar(&blob[..SCALAR_LEN])
        .ok_or_else(|| Error::Deserialization("share evaluation not a scalar".into()))?;
    let mut commitments = Vec::with_capacity(threshold);
    for chunk in blob[SCALAR_LEN..].chunks_exact(PUBKEY_COMPRESSED_LEN) {
        let point = engine::parse_point(chunk)
            .ok_or_else(|| Error::Deserialization("invalid coefficient commitment".into()))?;
        commitments.push(point);
    }
    Ok(ParsedShare {
        evaluation,
        commitments,
    })
}

/// Feldman check: `G * eval` must equal the commitment polynomial at `x`
fn verify_share(parsed: &ParsedShare, x: u64) -> bool {
    let x = Scalar::from(x);
    let mut acc = ProjectivePoint::IDENTITY;
    let mut x_power = Scalar::ONE;
    for commitment in &parsed.commitments {
        acc += *commitment * x_power;
        x_power *= x;
    }
    ProjectivePoint::GENERATOR * parsed.evaluation == acc
}

/// Keygen round 1, receive half: verify every incoming share and combine
/// them with the local evaluation into this participant's aggregated share.
///
/// A share that fails the Feldman check, or whose commitments do not match
/// the sender's registered public key, aborts the instance.
pub fn round1_absorb(
    ctx: &CryptoContext,
    session: &mut KeygenSession,
    secret: FrostSecret,
    shares: &[ShareMessage],
    signers: &[FrostSigner],
) -> Result<FrostSecret> {
    session.advance(KeygenState::SharesSent, KeygenState::SharesCollected)?;
    if shares.len() != session.n_parties - 1 {
        session.abort();
        return Err(Error::VerificationFailed(format!(
            "expected {} shares, got {}",
            session.n_parties - 1,
            shares.len()
        )));
    }
    let _shared = ctx.acquire_shared()?;

    let own_index = secret.index();
    let mut total = secret.evaluate(own_index as u64 + 1);
    let mut seen = vec![false; session.n_parties];
    seen[own_index] = true;

    for share in shares {
        if share.to != own_index {
            session.abort();
            return Err(Error::VerificationFailed(format!(
                "share addressed to {} received by {}",
                share.to, own_index
            )));
        }
        let sender = match signers.iter().find(|s| s.index == share.from) {
            Some(sender) => sender,
            None => {
                session.abort();
                return Err(Error::InvalidParticipant(share.from));
            }
        };
        if share.from >= session.n_parties || seen[share.from] {
            session.abort();
            return Err(Error::VerificationFailed(format!(
                "unexpected or duplicate share from participant {}",
                share.from
            )));
        }
        seen[share.from] = true;

        let parsed = match parse_share_blob(&share.blob, session.threshold) {
            Ok(parsed) => parsed,
            Err(e) => {
                session.abort();
                return Err(e);
            }
        };
        // the blob's constant-term commitment must be the sender's pubkey
        if engine::compress(&parsed.commitments[0]).as_slice() != sender.pubkey.as_slice() {
            session.abort();
            return Err(Error::VerificationFailed(format!(
                "share from participant {} not bound to its public key",
                share.from
            )));
        }
        if !verify_share(&parsed, own_index as u64 + 1) {
            session.abort();
            return Err(Error::VerificationFailed(format!(
                "share from participant {} does not match its commitments",
                share.from
            )));
        }
        total += parsed.evaluation;
    }

    Ok(secret.with_share(total))
}

/// Combine every participant's public key additively into the group key.
/// A pure function of public data, callable in any round.
pub fn aggregated_public_key(signers: &[FrostSigner]) -> Result<Vec<u8>> {
    if signers.is_empty() {
        return Err(Error::InvalidConfig("empty signer set".into()));
    }
    let mut acc = ProjectivePoint::IDENTITY;
    for signer in signers {
        let point = engine::parse_point(&signer.pubkey)
            .ok_or_else(|| Error::Deserialization("invalid signer public key".into()))?;
        acc += point;
    }
    if bool::from(acc.is_identity()) {
        return Err(Error::VerificationFailed(
            "aggregated public key is the identity".into(),
        ));
    }
    Ok(engine::compress(&acc).to_vec())
}

/// Challenge shared by every VSS proof of a keygen session
pub(crate) fn vss_challenge(session_id: &SessionId, group_key: &[u8]) -> Scalar {
    engine::hash_to_scalar(&[b"frost-secp256k1/vss", session_id, group_key])
}

/// Keygen round 2, send half: proof of knowledge of the constant term,
/// bound to the session and group key so all proofs share one challenge.
pub fn round2_proof(
    ctx: &CryptoContext,
    session: &mut KeygenSession,
    secret: &FrostSecret,
    signers: &[FrostSigner],
) -> Result<VssProofMessage> {
    session.advance(KeygenState::SharesCollected, KeygenState::VssSent)?;
    let shared = ctx.acquire_shared()?;

    let group_key = aggregated_public_key(signers)?;
    let challenge = vss_challenge(&session.id, &group_key);

    let constant = secret.constant_term();
    let k = engine::hash_to_scalar(&[
        b"frost-secp256k1/vss-nonce",
        shared.params().randomization(),
        constant.to_bytes().as_slice(),
        &session.id,
    ]);
    if bool::from(k.is_zero()) {
        return Err(Error::Internal("vss nonce derivation produced zero".into()));
    }

    let proof = VssProof {
        r: ProjectivePoint::GENERATOR * k,
        z: k + challenge * constant,
    };
    Ok(VssProofMessage {
        from: secret.index(),
        proof: proof.to_bytes().to_vec(),
    })
}

/// Keygen round 2, receive half: fold one signer's proof into the cache
pub fn round2_absorb(
    session: &KeygenSession,
    cache: &mut FrostCache,
    message: &VssProofMessage,
) -> Result<()> {
    if session.state != KeygenState::VssSent {
        return Err(Error::InvalidState {
            expected: KeygenState::VssSent.name(),
            actual: session.state.name(),
        });
    }
    if message.from >= session.n_parties {
        return Err(Error::InvalidParticipant(message.from));
    }
    let proof = VssProof::from_bytes(&message.proof)?;
    cache.insert(message.from, proof)
}

/// Combine all collected proofs; requires one proof per participant
pub fn aggregate_vss(session: &KeygenSession, cache: &FrostCache) -> Result<VssProof> {
    if cache.len() != session.n_parties {
        return Err(Error::VerificationFailed(format!(
            "expected {} vss proofs, got {}",
            session.n_parties,
            cache.len()
        )));
    }
    cache.combine()
}

/// Verify a combined proof against the aggregated public key.
///
/// `false` means at least one participant supplied inconsistent share
/// material; the caller must abort the instance.
pub fn verify_vss(
    session_id: &SessionId,
    proof: &VssProof,
    aggregator: &FrostSigner,
    group_key: &[u8],
) -> Result<bool> {
    let key_point = engine::parse_point(group_key)
        .ok_or_else(|| Error::Deserialization("invalid group key".into()))?;
    let challenge = vss_challenge(session_id, &engine::compress(&key_point));
    let ok = ProjectivePoint::GENERATOR * proof.z == proof.r + key_point * challenge;
    debug!(
        aggregator = aggregator.index,
        verified = ok,
        "vss aggregate verification"
    );
    Ok(ok)
}

/// Everything a participant holds after successful key generation
pub struct KeygenOutput {
    /// Compressed group public key
    pub group_key: Vec<u8>,
    /// Public records of all participants
    pub signers: Vec<FrostSigner>,
    /// This participant's secret with its aggregated share
    pub secret: FrostSecret,
    /// VSS material that signing sessions re-verify
    pub artifacts: VssArtifacts,
    /// Threshold the key was generated for
    pub threshold: usize,
}

/// Drive a full key generation instance over the transport.
///
/// Every participant calls this with its own config; the returned group key
/// is identical across participants.
#[instrument(skip(ctx, transport), fields(party_id = config.party_id))]
pub async fn run_keygen<T: Transport>(
    ctx: &CryptoContext,
    config: &SessionConfig,
    transport: &T,
) -> Result<KeygenOutput> {
    info!(
        n_parties = config.n_parties,
        threshold = config.threshold,
        "starting key generation"
    );
    let mut scratch = Marshaler::new();
    let mut session = KeygenSession::new(config.session_id, config.threshold, config.n_parties)?;

    let (secret, own_signer) = generate_key(ctx, config.threshold, config.party_id)?;

    // registration: everyone learns everyone's long-term pubkey
    transport
        .broadcast(
            &config.session_id,
            REGISTER_ROUND,
            &RegisterMessage {
                from: config.party_id,
                pubkey: own_signer.pubkey.clone(),
            },
        )
        .await?;
    let mut registrations: Vec<RegisterMessage> = transport
        .collect_broadcasts(&config.session_id, REGISTER_ROUND, config.n_parties)
        .await?;
    registrations.sort_by_key(|m| m.from);
    let signers: Vec<FrostSigner> = registrations
        .into_iter()
        .map(|m| FrostSigner {
            index: m.from,
            pubkey: m.pubkey,
        })
        .collect();
    for (i, signer) in signers.iter().enumerate() {
        if signer.index != i {
            return Err(Error::InvalidParticipant(signer.index));
        }
    }

    // round 1: distribute VSS-wrapped shares
    debug!("keygen round 1: share distribution");
    let shares = round1_shares(ctx, &mut scratch, &mut session, &secret, &signers)?;
    for share in shares {
        transport
            .send_direct(&config.session_id, SHARE_ROUND, share.to, &share)
            .await?;
    }
    let received: Vec<ShareMessage> = transport
        .collect_direct(
            &config.session_id,
            SHARE_ROUND,
            config.party_id,
            config.n_parties - 1,
        )
        .await?;
    let secret = round1_absorb(ctx, &mut session, secret, &received, &signers)?;

    // round 2: exchange and aggregate VSS proofs
    debug!("keygen round 2: vss proofs");
    let proof = round2_proof(ctx, &mut session, &secret, &signers)?;
    transport
        .broadcast(&config.session_id, PROOF_ROUND, &proof)
        .await?;
    let proofs: Vec<VssProofMessage> = transport
        .collect_broadcasts(&config.session_id, PROOF_ROUND, config.n_parties)
        .await?;

    let mut cache = FrostCache::new();
    for message in &proofs {
        round2_absorb(&session, &mut cache, message)?;
    }

    let group_key = aggregated_public_key(&signers)?;
    let aggregate = aggregate_vss(&session, &cache)?;
    let verified = verify_vss(&config.session_id, &aggregate, &signers[0], &group_key)?;
    if !verified {
        warn!("vss verification failed, aborting key generation");
    }
    session.complete(verified)?;

    info!(
        group_key = hex::encode(&group_key),
        "key generation completed"
    );
    Ok(KeygenOutput {
        group_key,
        signers,
        secret,
        artifacts: VssArtifacts::new(config.session_id, cache),
        threshold: config.threshold,
    })
}
