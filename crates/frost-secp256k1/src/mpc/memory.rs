//! In-memory transport for tests and single-process deployments

use std::pin::pin;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::trace;

use crate::types::{ParticipantIndex, SessionId};
use crate::{Error, Result};

use super::Transport;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type BroadcastKey = (SessionId, u32);
type DirectKey = (SessionId, u32, ParticipantIndex);

/// Shared in-process mailbox.
///
/// Messages are kept for the lifetime of the transport so every
/// participant can read a round's broadcasts independently; sessions are
/// isolated by their id.
pub struct MemoryTransport {
    broadcasts: DashMap<BroadcastKey, Vec<String>>,
    directs: DashMap<DirectKey, Vec<String>>,
    notify: Notify,
    timeout: Duration,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Transport that gives up on `collect_*` after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            broadcasts: DashMap::new(),
            directs: DashMap::new(),
            notify: Notify::new(),
            timeout,
        }
    }

    fn ready_broadcasts<M: DeserializeOwned>(
        &self,
        key: &BroadcastKey,
        expected: usize,
    ) -> Option<Result<Vec<M>>> {
        let entry = self.broadcasts.get(key)?;
        if entry.len() < expected {
            return None;
        }
        Some(
            entry
                .iter()
                .take(expected)
                .map(|raw| serde_json::from_str(raw).map_err(Error::from))
                .collect(),
        )
    }

    fn ready_directs<M: DeserializeOwned>(
        &self,
        key: &DirectKey,
        expected: usize,
    ) -> Option<Result<Vec<M>>> {
        let entry = self.directs.get(key)?;
        if entry.len() < expected {
            return None;
        }
        Some(
            entry
                .iter()
                .take(expected)
                .map(|raw| serde_json::from_str(raw).map_err(Error::from))
                .collect(),
        )
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn broadcast<M>(&self, session: &SessionId, round: u32, message: &M) -> Result<()>
    where
        M: Serialize + Send + Sync,
    {
        let raw = serde_json::to_string(message)?;
        trace!(round, "broadcast message stored");
        self.broadcasts
            .entry((*session, round))
            .or_default()
            .push(raw);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn collect_broadcasts<M>(
        &self,
        session: &SessionId,
        round: u32,
        expected: usize,
    ) -> Result<Vec<M>>
    where
        M: DeserializeOwned,
    {
        let key = (*session, round);
        let deadline = Instant::now() + self.timeout;
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if let Some(result) = self.ready_broadcasts(&key, expected) {
                return result;
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Err(Error::Transport(format!(
                    "timed out waiting for {expected} broadcasts in round {round}"
                )));
            }
        }
    }

    async fn send_direct<M>(
        &self,
        session: &SessionId,
        round: u32,
        to: ParticipantIndex,
        message: &M,
    ) -> Result<()>
    where
        M: Serialize + Send + Sync,
    {
        let raw = serde_json::to_string(message)?;
        trace!(round, to, "direct message stored");
        self.directs
            .entry((*session, round, to))
            .or_default()
            .push(raw);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn collect_direct<M>(
        &self,
        session: &SessionId,
        round: u32,
        to: ParticipantIndex,
        expected: usize,
    ) -> Result<Vec<M>>
    where
        M: DeserializeOwned,
    {
        let key = (*session, round, to);
        let deadline = Instant::now() + self.timeout;
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if let Some(result) = self.ready_directs(&key, expected) {
                return result;
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Err(Error::Transport(format!(
                    "timed out waiting for {expected} direct messages in round {round}"
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frost::messages::RegisterMessage;
    use std::sync::Arc;

    #[tokio::test]
    async fn broadcasts_reach_every_collector() {
        let transport = MemoryTransport::new();
        let session = [1u8; 32];

        for from in 0..3usize {
            transport
                .broadcast(
                    &session,
                    0,
                    &RegisterMessage {
                        from,
                        pubkey: vec![from as u8; 33],
                    },
                )
                .await
                .unwrap();
        }

        // both collectors see all three messages
        for _ in 0..2 {
            let messages: Vec<RegisterMessage> =
                transport.collect_broadcasts(&session, 0, 3).await.unwrap();
            assert_eq!(messages.len(), 3);
            assert_eq!(messages[2].from, 2);
        }
    }

    #[tokio::test]
    async fn collector_wakes_when_late_message_arrives() {
        let transport = Arc::new(MemoryTransport::new());
        let session = [2u8; 32];

        let collector = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport
                    .collect_broadcasts::<RegisterMessage>(&session, 0, 1)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        transport
            .broadcast(
                &session,
                0,
                &RegisterMessage {
                    from: 0,
                    pubkey: vec![0u8; 33],
                },
            )
            .await
            .unwrap();

        let messages = collector.await.unwrap().unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn direct_messages_are_scoped_to_their_addressee() {
        let transport = MemoryTransport::with_timeout(Duration::from_millis(50));
        let session = [3u8; 32];

        transport
            .send_direct(
                &session,
                1,
                1,
                &RegisterMessage {
                    from: 0,
                    pubkey: vec![0u8; 33],
                },
            )
            .await
            .unwrap();

        let delivered: Vec<RegisterMessage> =
            transport.collect_direct(&session, 1, 1, 1).await.unwrap();
        assert_eq!(delivered[0].from, 0);

        // the other participant's mailbox stays empty and times out
        let err = transport
            .collect_direct::<RegisterMessage>(&session, 1, 2, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn sessions_do_not_leak_into_each_other() {
        let transport = MemoryTransport::with_timeout(Duration::from_millis(50));

        transport
            .broadcast(
                &[4u8; 32],
                0,
                &RegisterMessage {
                    from: 0,
                    pubkey: vec![0u8; 33],
                },
            )
            .await
            .unwrap();

        let err = transport
            .collect_broadcasts::<RegisterMessage>(&[5u8; 32], 0, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
