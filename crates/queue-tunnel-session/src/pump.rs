//! The duplex pump run by both endpoints.
//!
//! A pump moves bytes in two independent directions:
//! - the read loop drains a local source into the outbound lane,
//! - the write loop drains the inbound lane into a local sink.
//!
//! The loops share nothing locally; the remote queue is the only shared
//! resource, and each lane has a single writer. Whichever loop stops first
//! stops the other through a shared [`Shutdown`].
//!
//! Delivery is at-least-once. A message is deleted only after it has been
//! written to the sink, so a crash between the two redelivers it on the
//! next run. A delete that merely fails is retried without rewriting the
//! message. Keys at or below the last delivered key are stale reads of an
//! eventually consistent store and are never written again.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use queue_tunnel_core::{
    ChunkCodec, Lane, LaneMessage, LaneRef, MessageKey, QueueTransport, SessionName,
    TunnelConfig,
};
use thiserror::Error;
use tokio::task::JoinError;

use crate::{
    Shutdown,
    local::{LocalSink, LocalSource},
};

/// Pump error.
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("Local source failed: {0}")]
    Source(#[source] std::io::Error),
    #[error("Local sink failed: {0}")]
    Sink(#[source] std::io::Error),
    #[error("Pump task failed: {0}")]
    Task(#[from] JoinError),
}

/// Why a loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The local source reported end of stream.
    EndOfStream,
    /// Shutdown was requested, by the other loop or from outside.
    Shutdown,
}

/// Scheduling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpTiming {
    /// Sleep between polls of the inbound lane.
    pub poll_interval: Duration,
    /// Longest single wait for local input before re-checking shutdown.
    pub read_timeout: Duration,
    /// Ceiling for retry backoff after transport errors.
    pub max_backoff: Duration,
}

impl PumpTiming {
    #[must_use]
    pub const fn from_config(config: &TunnelConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            read_timeout: config.read_timeout(),
            max_backoff: config.max_backoff(),
        }
    }
}

impl Default for PumpTiming {
    fn default() -> Self {
        Self::from_config(&TunnelConfig::default())
    }
}

/// Summary of a finished pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpReport {
    pub pushed_bytes: u64,
    pub pushed_messages: u64,
    pub delivered_bytes: u64,
    pub delivered_messages: u64,
    pub read_stop: StopReason,
    pub write_stop: StopReason,
}

#[derive(Debug)]
struct ReadStats {
    bytes: u64,
    messages: u64,
    stop: StopReason,
}

#[derive(Debug)]
struct WriteStats {
    bytes: u64,
    messages: u64,
}

/// Exponential backoff, doubling from the poll interval up to a ceiling.
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Shared, immutable state of both loops.
struct Lanes<T> {
    transport: Arc<T>,
    outbound: LaneRef,
    inbound: LaneRef,
    codec: ChunkCodec,
    timing: PumpTiming,
}

/// Moves bytes between a local source/sink pair and two lanes.
pub struct DuplexPump<T> {
    lanes: Lanes<T>,
}

impl<T: QueueTransport + 'static> DuplexPump<T> {
    /// Create a pump pushing to `outbound` and pulling from its opposite.
    #[must_use]
    pub fn new(
        transport: Arc<T>,
        session: SessionName,
        outbound: Lane,
        codec: ChunkCodec,
        timing: PumpTiming,
    ) -> Self {
        Self {
            lanes: Lanes {
                transport,
                outbound: LaneRef::new(session.clone(), outbound),
                inbound: LaneRef::new(session, outbound.opposite()),
                codec,
                timing,
            },
        }
    }

    /// Client side: keystrokes to `input`, `output` to the display.
    #[must_use]
    pub fn client(
        transport: Arc<T>,
        session: SessionName,
        codec: ChunkCodec,
        timing: PumpTiming,
    ) -> Self {
        Self::new(transport, session, Lane::Input, codec, timing)
    }

    /// Server side: shell output to `output`, `input` to the shell.
    #[must_use]
    pub fn server(
        transport: Arc<T>,
        session: SessionName,
        codec: ChunkCodec,
        timing: PumpTiming,
    ) -> Self {
        Self::new(transport, session, Lane::Output, codec, timing)
    }

    /// Run both loops until one of them stops, then stop the other.
    ///
    /// Triggering `shutdown` stops both loops; the pump never triggers
    /// `shutdown` itself.
    ///
    /// # Errors
    /// Returns error if the local source or sink fails, or a loop panics.
    pub async fn run<S, K>(
        self,
        source: S,
        sink: K,
        shutdown: &Shutdown,
    ) -> Result<PumpReport, PumpError>
    where
        S: LocalSource + 'static,
        K: LocalSink + 'static,
    {
        let stop = shutdown.child();
        let lanes = Arc::new(self.lanes);
        tracing::info!(
            outbound = %lanes.outbound,
            inbound = %lanes.inbound,
            codec = ?lanes.codec,
            "Pump started"
        );

        let reader = tokio::spawn(read_loop(Arc::clone(&lanes), source, stop.clone()));
        let writer = tokio::spawn(write_loop(Arc::clone(&lanes), sink, stop.clone()));
        let (read, write) = tokio::join!(reader, writer);

        let read = read?;
        let write = write?;
        let read = read?;
        let (write, write_stop) = write?;

        let report = PumpReport {
            pushed_bytes: read.bytes,
            pushed_messages: read.messages,
            delivered_bytes: write.bytes,
            delivered_messages: write.messages,
            read_stop: read.stop,
            write_stop,
        };
        tracing::info!(outbound = %lanes.outbound, ?report, "Pump stopped");
        Ok(report)
    }
}

async fn read_loop<T, S>(
    lanes: Arc<Lanes<T>>,
    mut source: S,
    stop: Shutdown,
) -> Result<ReadStats, PumpError>
where
    T: QueueTransport,
    S: LocalSource,
{
    let _stop_other = stop.trigger_on_drop();
    let mut buf = vec![0u8; lanes.codec.read_size().max(1)];
    let mut stats = ReadStats {
        bytes: 0,
        messages: 0,
        stop: StopReason::Shutdown,
    };

    while !stop.is_triggered() {
        let n = match tokio::time::timeout(lanes.timing.read_timeout, source.read_chunk(&mut buf))
            .await
        {
            Err(_elapsed) => continue,
            Ok(Ok(0)) => {
                tracing::debug!(lane = %lanes.outbound, "Local source ended");
                stats.stop = StopReason::EndOfStream;
                break;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Ok(Err(e)) => return Err(PumpError::Source(e)),
        };

        let messages = lanes.codec.encode(&buf[..n]);
        let total = messages.len();
        for (sent, message) in messages.iter().enumerate() {
            if !push_with_retry(&lanes, message, &stop).await {
                tracing::warn!(
                    lane = %lanes.outbound,
                    dropped = total - sent,
                    "Shutdown while retrying push, discarding unsent messages"
                );
                return Ok(stats);
            }
            stats.messages += 1;
        }
        stats.bytes += n as u64;
        tracing::debug!(lane = %lanes.outbound, bytes = n, messages = total, "Pushed");
    }

    Ok(stats)
}

/// Push one message, retrying until it lands. Returns `false` if shutdown
/// was requested first.
async fn push_with_retry<T: QueueTransport>(
    lanes: &Lanes<T>,
    message: &LaneMessage,
    stop: &Shutdown,
) -> bool {
    let mut backoff = Backoff::new(lanes.timing.poll_interval, lanes.timing.max_backoff);
    loop {
        match lanes.transport.push(&lanes.outbound, message).await {
            Ok(_key) => return true,
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::warn!(lane = %lanes.outbound, ?delay, "Push failed, retrying: {e}");
                if stop.sleep(delay).await {
                    return false;
                }
            }
        }
    }
}

async fn write_loop<T, K>(
    lanes: Arc<Lanes<T>>,
    mut sink: K,
    stop: Shutdown,
) -> Result<(WriteStats, StopReason), PumpError>
where
    T: QueueTransport,
    K: LocalSink,
{
    let _stop_other = stop.trigger_on_drop();
    let mut stats = WriteStats {
        bytes: 0,
        messages: 0,
    };
    let mut backoff = Backoff::new(lanes.timing.poll_interval, lanes.timing.max_backoff);
    // Written to the sink but not yet deleted from the lane.
    let mut undeleted: BTreeSet<MessageKey> = BTreeSet::new();
    let mut last_delivered: Option<MessageKey> = None;

    while !stop.is_triggered() {
        let snapshot = match lanes.transport.fetch_all(&lanes.inbound).await {
            Ok(snapshot) => {
                backoff.reset();
                snapshot
            }
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::warn!(lane = %lanes.inbound, ?delay, "Fetch failed, retrying: {e}");
                stop.sleep(delay).await;
                continue;
            }
        };

        if !snapshot.is_empty() {
            tracing::debug!(lane = %lanes.inbound, messages = snapshot.len(), "Fetched");
        }
        deliver_batch(
            &lanes,
            snapshot,
            &mut sink,
            &mut undeleted,
            &mut last_delivered,
            &mut stats,
        )
        .await?;

        stop.sleep(lanes.timing.poll_interval).await;
    }

    Ok((stats, StopReason::Shutdown))
}

/// Write every fetched message in key order, deleting each after writing.
async fn deliver_batch<T, K>(
    lanes: &Lanes<T>,
    snapshot: BTreeMap<MessageKey, LaneMessage>,
    sink: &mut K,
    undeleted: &mut BTreeSet<MessageKey>,
    last_delivered: &mut Option<MessageKey>,
    stats: &mut WriteStats,
) -> Result<(), PumpError>
where
    T: QueueTransport,
    K: LocalSink,
{
    undeleted.retain(|key| snapshot.contains_key(key));

    for (key, message) in snapshot {
        if undeleted.contains(&key) {
            if lanes.transport.delete(&lanes.inbound, &key).await.is_ok() {
                undeleted.remove(&key);
            }
            continue;
        }

        // Keys only grow, so anything at or below the last delivered key is
        // a stale read of a message already written.
        if last_delivered.as_ref().is_some_and(|last| key <= *last) {
            tracing::debug!(lane = %lanes.inbound, %key, "Skipping stale key");
            if lanes.transport.delete(&lanes.inbound, &key).await.is_err() {
                undeleted.insert(key);
            }
            continue;
        }

        match ChunkCodec::decode(&message) {
            Ok(bytes) => {
                sink.write_payload(&bytes).await.map_err(PumpError::Sink)?;
                stats.bytes += bytes.len() as u64;
                stats.messages += 1;
            }
            Err(e) => {
                tracing::warn!(lane = %lanes.inbound, %key, "Dropping undecodable message: {e}");
            }
        }

        if let Err(e) = lanes.transport.delete(&lanes.inbound, &key).await {
            tracing::warn!(lane = %lanes.inbound, %key, "Delete failed, will retry: {e}");
            undeleted.insert(key.clone());
        }
        *last_delivered = Some(key);
    }

    Ok(())
}
