//! Two-round threshold signing with commitment aggregation
//!
//! A signing session binds exactly one 32-byte digest and one fixed subset
//! of participants. Commitments from key generation are re-verified before
//! any nonce material is produced; the final signature is verified before
//! it is released, so an under-threshold subset fails loudly instead of
//! yielding a corrupt signature.

use std::collections::BTreeMap;

use k256::{ProjectivePoint, Scalar};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::engine;
use crate::marshal::Marshaler;
use crate::mpc::Transport;
use crate::types::{ParticipantIndex, SessionId, DIGEST_LEN, PUBKEY_COMPRESSED_LEN};
use crate::{ops, CryptoContext, Error, Result};

use super::keygen::{aggregated_public_key, vss_challenge, KeygenOutput};
use super::messages::{CommitMessage, PartialMessage};
use super::{FrostSecret, FrostSigner, VssArtifacts, VssProof};

const COMMIT_ROUND: u32 = 1;
const PARTIAL_ROUND: u32 = 2;

/// States of one signing session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignState {
    Init,
    CommitmentAggregated,
    PartialCollected,
    Aggregated,
    Verified,
    Failed,
}

impl SignState {
    fn name(self) -> &'static str {
        match self {
            SignState::Init => "init",
            SignState::CommitmentAggregated => "commitment aggregated",
            SignState::PartialCollected => "partials collected",
            SignState::Aggregated => "aggregated",
            SignState::Verified => "verified",
            SignState::Failed => "failed",
        }
    }
}

/// Ephemeral state of one signing operation: one message, one fixed
/// participant subset. Never reused across messages.
#[derive(Debug)]
pub struct SignSession {
    id: SessionId,
    msg: [u8; DIGEST_LEN],
    participants: Vec<ParticipantIndex>,
    group_key: Vec<u8>,
    state: SignState,
    commitments: BTreeMap<ParticipantIndex, ProjectivePoint>,
    partials: BTreeMap<ParticipantIndex, Scalar>,
}

impl SignSession {
    /// New session over a digest, participant subset and group key
    pub fn new(
        id: SessionId,
        msg: &[u8],
        participants: &[ParticipantIndex],
        group_key: &[u8],
    ) -> Result<Self> {
        let msg: [u8; DIGEST_LEN] = msg.try_into().map_err(|_| Error::InvalidInputLength {
            what: "message digest",
            len: msg.len(),
        })?;
        if group_key.len() != PUBKEY_COMPRESSED_LEN {
            return Err(Error::InvalidInputLength {
                what: "group key",
                len: group_key.len(),
            });
        }
        let mut participants = participants.to_vec();
        participants.sort_unstable();
        participants.dedup();
        if participants.is_empty() {
            return Err(Error::InvalidConfig("empty participant subset".into()));
        }
        Ok(Self {
            id,
            msg,
            participants,
            group_key: group_key.to_vec(),
            state: SignState::Init,
            commitments: BTreeMap::new(),
            partials: BTreeMap::new(),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SignState {
        self.state
    }

    pub fn participants(&self) -> &[ParticipantIndex] {
        &self.participants
    }

    fn expect(&self, expected: SignState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            });
        }
        Ok(())
    }

    fn fail(&mut self) {
        self.state = SignState::Failed;
    }

    fn group_nonce(&self) -> Result<(ProjectivePoint, [u8; 32], bool)> {
        let mut acc = ProjectivePoint::IDENTITY;
        for commitment in self.commitments.values() {
            acc += *commitment;
        }
        if acc == ProjectivePoint::IDENTITY {
            return Err(Error::VerificationFailed(
                "nonce commitments sum to the identity".into(),
            ));
        }
        let encoded = engine::compress(&acc);
        let flip = encoded[0] == 0x03;
        let mut r_x = [0u8; 32];
        r_x.copy_from_slice(&encoded[1..]);
        Ok((acc, r_x, flip))
    }
}

/// Deterministic signing nonce: context randomization, share, session, msg
fn signing_nonce(
    ctx: &CryptoContext,
    secret: &FrostSecret,
    session: &SignSession,
) -> Result<Scalar> {
    let shared = ctx.acquire_shared()?;
    let share = secret.share()?;
    let share_bytes = share.to_bytes();
    let nonce = engine::hash_to_scalar(&[
        b"frost-secp256k1/sign-nonce",
        shared.params().randomization(),
        share_bytes.as_slice(),
        &session.id,
        &session.msg,
    ]);
    if bool::from(nonce.is_zero()) {
        return Err(Error::Internal("nonce derivation produced zero".into()));
    }
    Ok(nonce)
}

/// Re-verify the VSS material from key generation without touching session
/// state. `None` means the commitments are not trustworthy.
fn verify_artifacts(
    signers: &[FrostSigner],
    artifacts: &VssArtifacts,
) -> Result<Option<VssProof>> {
    if artifacts.cache.len() != signers.len() {
        return Ok(None);
    }
    let aggregate = artifacts.cache.combine()?;
    let group_key = aggregated_public_key(signers)?;
    let key_point = engine::parse_point(&group_key)
        .ok_or_else(|| Error::Deserialization("invalid group key".into()))?;
    let challenge = vss_challenge(&artifacts.session_id, &group_key);
    let ok = ProjectivePoint::GENERATOR * aggregate.z == aggregate.r + key_point * challenge;
    Ok(ok.then_some(aggregate))
}

/// Re-run VSS aggregation and verification scoped to this signing session.
///
/// On failure the session transitions to `Failed` and no commitment is
/// returned; the caller must not proceed with signing.
pub fn aggregate_commitments(
    ctx: &CryptoContext,
    session: &mut SignSession,
    signers: &[FrostSigner],
    artifacts: &VssArtifacts,
) -> Result<Option<VssProof>> {
    session.expect(SignState::Init)?;
    let _shared = ctx.acquire_shared()?;

    match verify_artifacts(signers, artifacts)? {
        Some(aggregate) => {
            session.state = SignState::CommitmentAggregated;
            Ok(Some(aggregate))
        }
        None => {
            warn!("commitment verification failed");
            session.fail();
            Ok(None)
        }
    }
}

/// Signing round 1: derive this participant's nonce commitment.
///
/// Requires the session's aggregate commitment to have verified.
pub fn round1_commit(
    ctx: &CryptoContext,
    session: &SignSession,
    secret: &FrostSecret,
) -> Result<CommitMessage> {
    session.expect(SignState::CommitmentAggregated)?;
    if !session.participants.contains(&secret.index()) {
        return Err(Error::InvalidParticipant(secret.index()));
    }
    let nonce = signing_nonce(ctx, secret, session)?;
    let commitment = engine::compress(&(ProjectivePoint::GENERATOR * nonce));
    Ok(CommitMessage {
        from: secret.index(),
        commitment: commitment.to_vec(),
    })
}

/// Record one participant's nonce commitment; write-once per participant
pub fn add_commitment(session: &mut SignSession, message: &CommitMessage) -> Result<()> {
    session.expect(SignState::CommitmentAggregated)?;
    if !session.participants.contains(&message.from) {
        return Err(Error::InvalidParticipant(message.from));
    }
    let point = engine::parse_point(&message.commitment)
        .ok_or_else(|| Error::Deserialization("invalid nonce commitment".into()))?;
    if session.commitments.insert(message.from, point).is_some() {
        return Err(Error::VerificationFailed(format!(
            "duplicate commitment from participant {}",
            message.from
        )));
    }
    Ok(())
}

/// Signing round 2: derive this participant's partial signature.
///
/// Requires every participant's nonce commitment to be present.
pub fn round2_partial(
    ctx: &CryptoContext,
    session: &SignSession,
    secret: &FrostSecret,
) -> Result<PartialMessage> {
    session.expect(SignState::CommitmentAggregated)?;
    if session.commitments.len() != session.participants.len() {
        return Err(Error::InvalidState {
            expected: "all commitments collected",
            actual: "missing commitments",
        });
    }
    let (_, r_x, flip) = session.group_nonce()?;
    let challenge = {
        let mut group_key = [0u8; PUBKEY_COMPRESSED_LEN];
        group_key.copy_from_slice(&session.group_key);
        engine::schnorr_challenge(&r_x, &group_key, &session.msg)
    };

    let mut nonce = signing_nonce(ctx, secret, session)?;
    if flip {
        nonce = -nonce;
    }
    let lambda = lagrange_coefficient(secret.index(), &session.participants)?;
    let share = secret.share()?;
    let partial = nonce + challenge * lambda * share;

    Ok(PartialMessage {
        from: secret.index(),
        partial: partial.to_bytes().to_vec(),
    })
}

/// Record one participant's partial signature; the session moves to
/// `PartialCollected` once every participant has contributed
pub fn add_partial(session: &mut SignSession, message: &PartialMessage) -> Result<()> {
    session.expect(SignState::CommitmentAggregated)?;
    if !session.participants.contains(&message.from) {
        return Err(Error::InvalidParticipant(message.from));
    }
    let partial = engine::parse_scalar(&message.partial)
        .ok_or_else(|| Error::Deserialization("invalid partial signature".into()))?;
    if session.partials.insert(message.from, partial).is_some() {
        return Err(Error::VerificationFailed(format!(
            "duplicate partial signature from participant {}",
            message.from
        )));
    }
    if session.partials.len() == session.participants.len() {
        session.state = SignState::PartialCollected;
    }
    Ok(())
}

/// Combine all collected partial signatures into the final 64-byte
/// signature, re-verifying the keygen commitments and the result itself.
///
/// An under-threshold subset cannot reconstruct the group secret, so its
/// combined signature fails the final verification and the session ends in
/// `Failed` instead of releasing a corrupt signature.
pub fn aggregate_signature(
    ctx: &CryptoContext,
    session: &mut SignSession,
    signers: &[FrostSigner],
    artifacts: &VssArtifacts,
) -> Result<Vec<u8>> {
    session.expect(SignState::PartialCollected)?;
    let _shared = ctx.acquire_shared()?;

    if verify_artifacts(signers, artifacts)?.is_none() {
        warn!("commitment verification failed during aggregation");
        session.fail();
        return Err(Error::ProtocolAborted(
            "commitment verification failed".into(),
        ));
    }

    let (_, r_x, _) = session.group_nonce()?;
    let mut z = Scalar::ZERO;
    for partial in session.partials.values() {
        z += *partial;
    }

    let mut sig = vec![0u8; 64];
    sig[..32].copy_from_slice(&r_x);
    sig[32..].copy_from_slice(&z.to_bytes());
    session.state = SignState::Aggregated;

    if !engine::schnorr_verify(&sig, &session.msg, &session.group_key) {
        session.fail();
        return Err(Error::InvalidSignature);
    }
    session.state = SignState::Verified;
    Ok(sig)
}

/// Verify a 64-byte threshold signature against a digest and a group key.
///
/// Standard Schnorr semantics, shared with the single-party verifier.
pub fn frost_verify(
    ctx: &CryptoContext,
    scratch: &mut Marshaler,
    signature: &[u8],
    digest: &[u8],
    group_key: &[u8],
) -> Result<bool> {
    ops::schnorr_verify(ctx, scratch, signature, digest, group_key)
}

/// Lagrange coefficient at zero for `index` over the participant subset,
/// with 1-based evaluation points
fn lagrange_coefficient(
    index: ParticipantIndex,
    participants: &[ParticipantIndex],
) -> Result<Scalar> {
    let i = index as u64 + 1;
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;

    for &other in participants {
        let j = other as u64 + 1;
        if j == i {
            continue;
        }
        numerator *= Scalar::from(j);
        let diff = if j > i {
            Scalar::from(j - i)
        } else {
            -Scalar::from(i - j)
        };
        denominator *= diff;
    }

    let inverted = Option::<Scalar>::from(denominator.invert())
        .ok_or_else(|| Error::Internal("degenerate participant subset".into()))?;
    Ok(numerator * inverted)
}

/// Session id binding one signing operation to the key, subset and digest
pub fn derive_session_id(
    keygen_id: &SessionId,
    participants: &[ParticipantIndex],
    msg: &[u8],
) -> SessionId {
    let mut hasher = Sha256::new();
    hasher.update(b"frost-secp256k1/sign-session");
    hasher.update(keygen_id);
    for participant in participants {
        hasher.update((*participant as u64).to_be_bytes());
    }
    hasher.update(msg);
    hasher.finalize().into()
}

/// Drive a full signing session over the transport.
///
/// Every participant of the subset calls this with its own key material;
/// all of them obtain (and verify) the same signature.
#[instrument(skip(ctx, key, transport), fields(party_id = key.secret.index()))]
pub async fn run_signing<T: Transport>(
    ctx: &CryptoContext,
    key: &KeygenOutput,
    msg: &[u8],
    participants: &[ParticipantIndex],
    transport: &T,
) -> Result<Vec<u8>> {
    info!(participants = ?participants, "starting threshold signing");

    if participants.len() < key.threshold {
        return Err(Error::ThresholdNotMet {
            required: key.threshold,
            actual: participants.len(),
        });
    }
    if !participants.contains(&key.secret.index()) {
        return Err(Error::InvalidParticipant(key.secret.index()));
    }

    let session_id = derive_session_id(&key.artifacts.session_id, participants, msg);
    let mut session = SignSession::new(session_id, msg, participants, &key.group_key)?;

    if aggregate_commitments(ctx, &mut session, &key.signers, &key.artifacts)?.is_none() {
        return Err(Error::ProtocolAborted(
            "commitment verification failed".into(),
        ));
    }

    debug!("signing round 1: nonce commitments");
    let commit = round1_commit(ctx, &session, &key.secret)?;
    transport
        .broadcast(&session_id, COMMIT_ROUND, &commit)
        .await?;
    let commits: Vec<CommitMessage> = transport
        .collect_broadcasts(&session_id, COMMIT_ROUND, session.participants().len())
        .await?;
    for message in &commits {
        add_commitment(&mut session, message)?;
    }

    debug!("signing round 2: partial signatures");
    let partial = round2_partial(ctx, &session, &key.secret)?;
    transport
        .broadcast(&session_id, PARTIAL_ROUND, &partial)
        .await?;
    let partials: Vec<PartialMessage> = transport
        .collect_broadcasts(&session_id, PARTIAL_ROUND, session.participants().len())
        .await?;
    for message in &partials {
        add_partial(&mut session, message)?;
    }

    let signature = aggregate_signature(ctx, &mut session, &key.signers, &key.artifacts)?;
    info!(signature = hex::encode(&signature), "signing completed");
    Ok(signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frost::keygen::tests::local_keygen;

    /// Drive signing in-process over the given subset, without a transport
    fn local_sign(
        ctx: &CryptoContext,
        outputs: &[KeygenOutput],
        participants: &[ParticipantIndex],
        msg: &[u8; 32],
    ) -> Result<Vec<u8>> {
        let session_id =
            derive_session_id(&outputs[0].artifacts.session_id, participants, msg);

        let mut sessions: Vec<(ParticipantIndex, SignSession)> = Vec::new();
        for &index in participants {
            let key = &outputs[index];
            let mut session =
                SignSession::new(session_id, msg, participants, &key.group_key)?;
            if aggregate_commitments(ctx, &mut session, &key.signers, &key.artifacts)?.is_none()
            {
                return Err(Error::ProtocolAborted("commitments rejected".into()));
            }
            sessions.push((index, session));
        }

        let commits: Vec<CommitMessage> = sessions
            .iter()
            .map(|(index, session)| round1_commit(ctx, session, &outputs[*index].secret))
            .collect::<Result<_>>()?;
        for (_, session) in sessions.iter_mut() {
            for commit in &commits {
                add_commitment(session, commit)?;
            }
        }

        let partials: Vec<PartialMessage> = sessions
            .iter()
            .map(|(index, session)| round2_partial(ctx, session, &outputs[*index].secret))
            .collect::<Result<_>>()?;
        for (_, session) in sessions.iter_mut() {
            for partial in &partials {
                add_partial(session, partial)?;
            }
        }

        let (index, session) = &mut sessions[0];
        let key = &outputs[*index];
        aggregate_signature(ctx, session, &key.signers, &key.artifacts)
    }

    #[test]
    fn threshold_subset_produces_valid_signature() {
        let ctx = CryptoContext::new();
        let mut scratch = Marshaler::new();
        let outputs = local_keygen(&ctx, 3, 2).unwrap();
        let msg = [0x2cu8; 32];

        let sig = local_sign(&ctx, &outputs, &[0, 2], &msg).unwrap();
        assert_eq!(sig.len(), 64);
        assert!(frost_verify(&ctx, &mut scratch, &sig, &msg, &outputs[0].group_key).unwrap());

        // a different digest does not verify
        assert!(
            !frost_verify(&ctx, &mut scratch, &sig, &[0u8; 32], &outputs[0].group_key).unwrap()
        );
    }

    #[test]
    fn full_set_produces_valid_signature() {
        let ctx = CryptoContext::new();
        let mut scratch = Marshaler::new();
        let outputs = local_keygen(&ctx, 3, 2).unwrap();
        let msg = [0x55u8; 32];

        let sig = local_sign(&ctx, &outputs, &[0, 1, 2], &msg).unwrap();
        assert!(frost_verify(&ctx, &mut scratch, &sig, &msg, &outputs[0].group_key).unwrap());
    }

    #[test]
    fn below_threshold_fails_at_aggregation() {
        let ctx = CryptoContext::new();
        let outputs = local_keygen(&ctx, 3, 2).unwrap();
        let msg = [0x11u8; 32];

        let err = local_sign(&ctx, &outputs, &[1], &msg).unwrap_err();
        assert!(matches!(err, Error::InvalidSignature));
    }

    #[test]
    fn resigning_needs_a_new_session_and_works() {
        let ctx = CryptoContext::new();
        let mut scratch = Marshaler::new();
        let outputs = local_keygen(&ctx, 3, 2).unwrap();

        let first = local_sign(&ctx, &outputs, &[0, 1], &[0xaau8; 32]).unwrap();
        let second = local_sign(&ctx, &outputs, &[0, 1], &[0xbbu8; 32]).unwrap();
        assert_ne!(first, second);
        assert!(frost_verify(&ctx, &mut scratch, &second, &[0xbbu8; 32], &outputs[0].group_key)
            .unwrap());
    }

    #[test]
    fn corrupt_artifacts_fail_commitment_aggregation() {
        let ctx = CryptoContext::new();
        let outputs = local_keygen(&ctx, 3, 2).unwrap();
        let key = &outputs[0];

        let mut artifacts = key.artifacts.clone();
        // bind the proofs to a different session: aggregation must reject
        artifacts.session_id = [0xffu8; 32];

        let mut session =
            SignSession::new([1u8; 32], &[0u8; 32], &[0, 1], &key.group_key).unwrap();
        let aggregate =
            aggregate_commitments(&ctx, &mut session, &key.signers, &artifacts).unwrap();
        assert!(aggregate.is_none());
        assert_eq!(session.state(), SignState::Failed);

        // the failed session refuses further rounds
        assert!(matches!(
            round1_commit(&ctx, &session, &key.secret),
            Err(Error::InvalidState { .. })
        ));
    }

    #[test]
    fn tampered_partial_fails_final_verification() {
        let ctx = CryptoContext::new();
        let outputs = local_keygen(&ctx, 3, 2).unwrap();
        let msg = [0x77u8; 32];
        let participants = [0usize, 1];
        let session_id =
            derive_session_id(&outputs[0].artifacts.session_id, &participants, &msg);

        let key0 = &outputs[0];
        let mut session =
            SignSession::new(session_id, &msg, &participants, &key0.group_key).unwrap();
        aggregate_commitments(&ctx, &mut session, &key0.signers, &key0.artifacts)
            .unwrap()
            .unwrap();

        let key1 = &outputs[1];
        let mut peer =
            SignSession::new(session_id, &msg, &participants, &key1.group_key).unwrap();
        aggregate_commitments(&ctx, &mut peer, &key1.signers, &key1.artifacts)
            .unwrap()
            .unwrap();

        let commit0 = round1_commit(&ctx, &session, &key0.secret).unwrap();
        let commit1 = round1_commit(&ctx, &peer, &key1.secret).unwrap();
        for commit in [&commit0, &commit1] {
            add_commitment(&mut session, commit).unwrap();
            add_commitment(&mut peer, commit).unwrap();
        }

        let partial0 = round2_partial(&ctx, &session, &key0.secret).unwrap();
        let mut partial1 = round2_partial(&ctx, &peer, &key1.secret).unwrap();
        partial1.partial[31] ^= 0x01;

        add_partial(&mut session, &partial0).unwrap();
        add_partial(&mut session, &partial1).unwrap();

        let err =
            aggregate_signature(&ctx, &mut session, &key0.signers, &key0.artifacts).unwrap_err();
        assert!(matches!(err, Error::InvalidSignature));
        assert_eq!(session.state(), SignState::Failed);
    }

    mod end_to_end {
        use super::*;
        use crate::frost::keygen::run_keygen;
        use crate::mpc::MemoryTransport;
        use crate::types::SessionConfig;
        use std::sync::Arc;

        #[tokio::test(flavor = "multi_thread")]
        async fn keygen_and_signing_over_transport() {
            let _ = tracing_subscriber::fmt().with_test_writer().try_init();
            let ctx = Arc::new(CryptoContext::new());
            let transport = Arc::new(MemoryTransport::new());
            let keygen_id = [0x31u8; 32];

            let handles: Vec<_> = (0..3)
                .map(|party| {
                    let ctx = Arc::clone(&ctx);
                    let transport = Arc::clone(&transport);
                    tokio::spawn(async move {
                        let config = SessionConfig::new(keygen_id, 3, 2, party).unwrap();
                        run_keygen(&ctx, &config, &*transport).await.unwrap()
                    })
                })
                .collect();

            let mut outputs = Vec::new();
            for handle in futures_util::future::join_all(handles).await {
                outputs.push(handle.unwrap());
            }
            outputs.sort_by_key(|o| o.secret.index());
            assert_eq!(outputs[0].group_key, outputs[1].group_key);
            assert_eq!(outputs[1].group_key, outputs[2].group_key);

            let msg = [0x64u8; 32];
            let participants = vec![0usize, 2];
            let sign_handles: Vec<_> = outputs
                .into_iter()
                .filter(|o| participants.contains(&o.secret.index()))
                .map(|key| {
                    let ctx = Arc::clone(&ctx);
                    let transport = Arc::clone(&transport);
                    let participants = participants.clone();
                    tokio::spawn(async move {
                        run_signing(&ctx, &key, &msg, &participants, &*transport)
                            .await
                            .map(|sig| (sig, key))
                    })
                })
                .collect();

            let mut signatures = Vec::new();
            let mut group_key = Vec::new();
            for handle in futures_util::future::join_all(sign_handles).await {
                let (sig, key) = handle.unwrap().unwrap();
                group_key = key.group_key.clone();
                signatures.push(sig);
            }
            assert_eq!(signatures[0], signatures[1]);

            let mut scratch = Marshaler::new();
            assert!(frost_verify(&ctx, &mut scratch, &signatures[0], &msg, &group_key).unwrap());
        }

        #[tokio::test]
        async fn under_threshold_subset_is_rejected_up_front() {
            let ctx = CryptoContext::new();
            let outputs = local_keygen(&ctx, 3, 2).unwrap();
            let transport = MemoryTransport::new();

            let err = run_signing(&ctx, &outputs[1], &[0u8; 32], &[1], &transport)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                Error::ThresholdNotMet {
                    required: 2,
                    actual: 1
                }
            ));
        }
    }
}
