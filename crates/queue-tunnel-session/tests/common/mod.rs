#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap},
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use queue_tunnel_core::{
    LaneMessage, LaneRef, MessageKey, QueueTransport, SessionName, SessionStatus, TransportError,
};
use queue_tunnel_session::{LocalSink, LocalSource, PumpTiming, TerminalMode};
use queue_tunnel_transport::MemoryQueue;

pub const WAIT: Duration = Duration::from_secs(10);

pub fn fast_timing() -> PumpTiming {
    PumpTiming {
        poll_interval: Duration::from_millis(2),
        read_timeout: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
    }
}

pub fn session(name: &str) -> SessionName {
    SessionName::new(name).unwrap()
}

/// Concatenated payload of every message still in a lane.
pub async fn lane_bytes<T: QueueTransport>(queue: &T, lane: &LaneRef) -> Vec<u8> {
    queue
        .fetch_all(lane)
        .await
        .unwrap()
        .values()
        .flat_map(|m| m.decode().unwrap())
        .collect()
}

/// Sink collecting everything written to it.
#[derive(Clone, Default)]
pub struct RecordingSink(pub Arc<Mutex<Vec<u8>>>);

impl RecordingSink {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &[u8]) -> bool {
        self.0
            .lock()
            .unwrap()
            .windows(needle.len())
            .any(|w| w == needle)
    }

    /// Poll until the recorded bytes satisfy `done`.
    pub async fn wait_until(&self, done: impl Fn(&[u8]) -> bool) {
        tokio::time::timeout(WAIT, async {
            while !done(&self.bytes()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out, got {:?}", String::from_utf8_lossy(&self.bytes())));
    }
}

#[async_trait]
impl LocalSink for RecordingSink {
    async fn write_payload(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.0.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }
}

/// Source that never yields.
pub struct IdleSource;

#[async_trait]
impl LocalSource for IdleSource {
    async fn read_chunk(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        std::future::pending().await
    }
}

/// Source that fails on first read.
pub struct FailingSource;

#[async_trait]
impl LocalSource for FailingSource {
    async fn read_chunk(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::other("keyboard unplugged"))
    }
}

/// Terminal mode that records transitions.
#[derive(Clone, Default)]
pub struct RecordingMode(pub Arc<Mutex<Vec<&'static str>>>);

impl RecordingMode {
    pub fn events(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }
}

impl TerminalMode for RecordingMode {
    fn enter_raw(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().push("raw");
        Ok(())
    }

    fn restore(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().push("restore");
        Ok(())
    }
}

/// Memory queue failing every `period`-th call of each operation before
/// touching the data.
pub struct FlakyQueue {
    inner: MemoryQueue,
    period: u64,
    pushes: AtomicU64,
    fetches: AtomicU64,
    deletes: AtomicU64,
}

impl FlakyQueue {
    pub fn new(period: u64) -> Self {
        Self {
            inner: MemoryQueue::new(),
            period,
            pushes: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &MemoryQueue {
        &self.inner
    }

    fn trip(&self, counter: &AtomicU64) -> Result<(), TransportError> {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if n % self.period == 0 {
            Err(TransportError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl QueueTransport for FlakyQueue {
    async fn push(
        &self,
        lane: &LaneRef,
        message: &LaneMessage,
    ) -> Result<MessageKey, TransportError> {
        self.trip(&self.pushes)?;
        self.inner.push(lane, message).await
    }

    async fn fetch_all(
        &self,
        lane: &LaneRef,
    ) -> Result<BTreeMap<MessageKey, LaneMessage>, TransportError> {
        self.trip(&self.fetches)?;
        self.inner.fetch_all(lane).await
    }

    async fn delete(&self, lane: &LaneRef, key: &MessageKey) -> Result<(), TransportError> {
        self.trip(&self.deletes)?;
        self.inner.delete(lane, key).await
    }

    async fn set_status(
        &self,
        session: &SessionName,
        status: &SessionStatus,
    ) -> Result<(), TransportError> {
        self.inner.set_status(session, status).await
    }
}

/// Memory queue whose reads lag behind its deletes: the first fetch of a
/// lane after a delete returns the snapshot from the fetch before it.
pub struct StaleQueue {
    inner: MemoryQueue,
    snapshots: Mutex<HashMap<String, BTreeMap<MessageKey, LaneMessage>>>,
    lagging: AtomicBool,
}

impl StaleQueue {
    pub fn new() -> Self {
        Self {
            inner: MemoryQueue::new(),
            snapshots: Mutex::new(HashMap::new()),
            lagging: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &MemoryQueue {
        &self.inner
    }
}

#[async_trait]
impl QueueTransport for StaleQueue {
    async fn push(
        &self,
        lane: &LaneRef,
        message: &LaneMessage,
    ) -> Result<MessageKey, TransportError> {
        self.inner.push(lane, message).await
    }

    async fn fetch_all(
        &self,
        lane: &LaneRef,
    ) -> Result<BTreeMap<MessageKey, LaneMessage>, TransportError> {
        if self.lagging.swap(false, Ordering::SeqCst) {
            if let Some(old) = self.snapshots.lock().unwrap().get(&lane.path()) {
                return Ok(old.clone());
            }
        }
        let fresh = self.inner.fetch_all(lane).await?;
        self.snapshots
            .lock()
            .unwrap()
            .insert(lane.path(), fresh.clone());
        Ok(fresh)
    }

    async fn delete(&self, lane: &LaneRef, key: &MessageKey) -> Result<(), TransportError> {
        self.lagging.store(true, Ordering::SeqCst);
        self.inner.delete(lane, key).await
    }

    async fn set_status(
        &self,
        session: &SessionName,
        status: &SessionStatus,
    ) -> Result<(), TransportError> {
        self.inner.set_status(session, status).await
    }
}
