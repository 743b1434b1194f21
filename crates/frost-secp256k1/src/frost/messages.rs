//! Round message types exchanged between participants

use serde::{Deserialize, Serialize};

use crate::types::ParticipantIndex;

/// Broadcast before keygen round 1: a participant's long-term public key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMessage {
    /// Sender participant index
    pub from: ParticipantIndex,
    /// Compressed public key
    pub pubkey: Vec<u8>,
}

/// Keygen round 1 direct message: a VSS-wrapped share for one peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareMessage {
    /// Sender participant index
    pub from: ParticipantIndex,
    /// Receiver participant index
    pub to: ParticipantIndex,
    /// Share evaluation packed with the sender's coefficient commitments
    pub blob: Vec<u8>,
}

/// Keygen round 2 broadcast: the sender's VSS proof
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VssProofMessage {
    /// Sender participant index
    pub from: ParticipantIndex,
    /// 65-byte proof wire form
    pub proof: Vec<u8>,
}

/// Signing round 1 broadcast: a participant's nonce commitment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitMessage {
    /// Sender participant index
    pub from: ParticipantIndex,
    /// Compressed nonce commitment point
    pub commitment: Vec<u8>,
}

/// Signing round 2 broadcast: a participant's partial signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialMessage {
    /// Sender participant index
    pub from: ParticipantIndex,
    /// 32-byte partial signature scalar
    pub partial: Vec<u8>,
}
