//! In-memory queue transport.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use queue_tunnel_core::{
    LaneMessage, LaneRef, MessageKey, QueueTransport, SessionName, SessionStatus, TransportError,
};

/// In-memory transport implementation.
///
/// Useful for tests and for running both endpoints in one process.
/// Data is lost on restart.
pub struct MemoryQueue {
    lanes: RwLock<HashMap<String, BTreeMap<MessageKey, LaneMessage>>>,
    statuses: RwLock<HashMap<SessionName, SessionStatus>>,
    next_seq: AtomicU64,
}

impl MemoryQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lanes: RwLock::new(HashMap::new()),
            statuses: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Number of undeleted messages in a lane.
    ///
    /// # Errors
    /// Returns error if the lock is poisoned.
    pub fn len(&self, lane: &LaneRef) -> Result<usize, TransportError> {
        Ok(self
            .lanes
            .read()
            .map_err(|e| TransportError::Internal(e.to_string()))?
            .get(&lane.path())
            .map_or(0, BTreeMap::len))
    }

    /// Last status written for a session.
    ///
    /// # Errors
    /// Returns error if the lock is poisoned.
    pub fn status(&self, session: &SessionName) -> Result<Option<SessionStatus>, TransportError> {
        Ok(self
            .statuses
            .read()
            .map_err(|e| TransportError::Internal(e.to_string()))?
            .get(session)
            .cloned())
    }

    fn next_key(&self) -> MessageKey {
        // Zero padding keeps byte-wise order equal to numeric order.
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        MessageKey::new(format!("{seq:020}"))
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueTransport for MemoryQueue {
    async fn push(&self, lane: &LaneRef, message: &LaneMessage) -> Result<MessageKey, TransportError> {
        let mut lanes = self
            .lanes
            .write()
            .map_err(|e| TransportError::Internal(e.to_string()))?;

        // Allocate under the write lock so concurrent pushes land in key order.
        let key = self.next_key();
        lanes
            .entry(lane.path())
            .or_default()
            .insert(key.clone(), message.clone());

        Ok(key)
    }

    async fn fetch_all(
        &self,
        lane: &LaneRef,
    ) -> Result<BTreeMap<MessageKey, LaneMessage>, TransportError> {
        Ok(self
            .lanes
            .read()
            .map_err(|e| TransportError::Internal(e.to_string()))?
            .get(&lane.path())
            .cloned()
            .unwrap_or_default())
    }

    async fn delete(&self, lane: &LaneRef, key: &MessageKey) -> Result<(), TransportError> {
        let mut lanes = self
            .lanes
            .write()
            .map_err(|e| TransportError::Internal(e.to_string()))?;

        if let Some(entries) = lanes.get_mut(&lane.path()) {
            entries.remove(key);
        }

        Ok(())
    }

    async fn set_status(
        &self,
        session: &SessionName,
        status: &SessionStatus,
    ) -> Result<(), TransportError> {
        self.statuses
            .write()
            .map_err(|e| TransportError::Internal(e.to_string()))?
            .insert(session.clone(), status.clone());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use queue_tunnel_core::Lane;
    use tokio_test::assert_ok;

    use super::*;

    fn lane(lane: Lane) -> LaneRef {
        LaneRef::new(SessionName::new("test-session").unwrap(), lane)
    }

    #[tokio::test]
    async fn test_push_returns_increasing_keys() {
        let queue = MemoryQueue::new();
        let input = lane(Lane::Input);

        let mut last: Option<MessageKey> = None;
        for b in 0..=20u8 {
            let key = queue.push(&input, &LaneMessage::byte(b)).await.unwrap();
            if let Some(prev) = &last {
                assert!(key > *prev, "{key} should sort after {prev}");
            }
            last = Some(key);
        }
    }

    #[tokio::test]
    async fn test_fetch_all_is_ordered_snapshot() {
        let queue = MemoryQueue::new();
        let output = lane(Lane::Output);

        for b in b"hello" {
            queue.push(&output, &LaneMessage::byte(*b)).await.unwrap();
        }

        let snapshot = queue.fetch_all(&output).await.unwrap();
        let bytes: Vec<u8> = snapshot
            .values()
            .flat_map(|m| m.decode().unwrap())
            .collect();
        assert_eq!(bytes, b"hello");

        // Lanes are independent.
        assert!(queue.fetch_all(&lane(Lane::Input)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let queue = MemoryQueue::new();
        let input = lane(Lane::Input);

        let first = queue.push(&input, &LaneMessage::byte(1)).await.unwrap();
        queue.push(&input, &LaneMessage::byte(2)).await.unwrap();

        assert_ok!(queue.delete(&input, &first).await);
        assert_ok!(queue.delete(&input, &first).await);
        assert_ok!(queue.delete(&input, &MessageKey::new("missing")).await);
        assert_ok!(queue.delete(&lane(Lane::Output), &first).await);

        assert_eq!(queue.len(&input).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_status_marker() {
        let queue = MemoryQueue::new();
        let session = SessionName::new("test-session").unwrap();

        assert_eq!(queue.status(&session).unwrap(), None);
        queue
            .set_status(&session, &SessionStatus::Connected)
            .await
            .unwrap();
        queue
            .set_status(&session, &SessionStatus::Exited { code: Some(0) })
            .await
            .unwrap();
        assert_eq!(
            queue.status(&session).unwrap(),
            Some(SessionStatus::Exited { code: Some(0) })
        );
    }
}
