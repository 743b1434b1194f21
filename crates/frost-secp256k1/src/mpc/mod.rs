//! Message transport between protocol participants
//!
//! Protocol drivers are written against the [`Transport`] trait only; the
//! in-memory implementation backs tests and single-process deployments.
//! Messages are serialized as JSON and addressed by session id and round
//! number, with an optional recipient for direct messages.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::{ParticipantIndex, SessionId};
use crate::Result;

mod memory;

pub use memory::MemoryTransport;

/// Message delivery between participants of one protocol session.
///
/// Broadcasts are visible to every participant, the sender included;
/// direct messages only to their addressee. `collect_*` waits until the
/// expected number of messages for the round has arrived.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a message to all participants of the session
    async fn broadcast<M>(&self, session: &SessionId, round: u32, message: &M) -> Result<()>
    where
        M: Serialize + Send + Sync;

    /// Wait for `expected` broadcast messages in the round
    async fn collect_broadcasts<M>(
        &self,
        session: &SessionId,
        round: u32,
        expected: usize,
    ) -> Result<Vec<M>>
    where
        M: DeserializeOwned;

    /// Send a message to a single participant
    async fn send_direct<M>(
        &self,
        session: &SessionId,
        round: u32,
        to: ParticipantIndex,
        message: &M,
    ) -> Result<()>
    where
        M: Serialize + Send + Sync;

    /// Wait for `expected` direct messages addressed to `to` in the round
    async fn collect_direct<M>(
        &self,
        session: &SessionId,
        round: u32,
        to: ParticipantIndex,
        expected: usize,
    ) -> Result<Vec<M>>
    where
        M: DeserializeOwned;
}
