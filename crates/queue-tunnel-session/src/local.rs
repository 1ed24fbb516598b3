//! Local byte sources and sinks a pump moves data between.

use std::io::{self, ErrorKind, Read};

use async_trait::async_trait;
use queue_tunnel_pty::{PtyInput, PtyOutput};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};

/// Where outbound bytes come from.
#[async_trait]
pub trait LocalSource: Send {
    /// Read up to `buf.len()` bytes. `Ok(0)` means end of stream.
    ///
    /// Must be cancel safe: the pump bounds each wait with a timeout and
    /// drops the future when it elapses.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Where inbound bytes go.
#[async_trait]
pub trait LocalSink: Send {
    /// Write the whole payload.
    async fn write_payload(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Source over any tokio reader.
pub struct ReaderSource<R>(pub R);

#[async_trait]
impl<R: AsyncRead + Unpin + Send> LocalSource for ReaderSource<R> {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf).await
    }
}

/// Sink over any tokio writer. Flushes after every payload.
pub struct WriterSink<W>(pub W);

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> LocalSink for WriterSink<W> {
    async fn write_payload(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.0.write_all(bytes).await?;
        self.0.flush().await
    }
}

#[async_trait]
impl LocalSource for PtyOutput {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read(buf).await)
    }
}

#[async_trait]
impl LocalSink for PtyInput {
    async fn write_payload(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes).await
    }
}

/// Process stdin, read on a dedicated thread.
///
/// The thread is detached: a read blocked on an idle terminal never holds
/// up runtime shutdown.
pub struct StdinSource {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
}

impl StdinSource {
    /// Start reading stdin in chunks of at most `read_size` bytes.
    ///
    /// # Errors
    /// Returns error if the reader thread cannot be started.
    pub fn spawn(read_size: usize) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel(16);
        std::thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                let mut stdin = io::stdin();
                let mut buf = vec![0u8; read_size.max(1)];
                loop {
                    let result = match stdin.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => Ok(buf[..n].to_vec()),
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(e) => Err(e),
                    };
                    let failed = result.is_err();
                    if tx.blocking_send(result).is_err() || failed {
                        break;
                    }
                }
            })?;

        Ok(Self {
            rx,
            pending: Vec::new(),
        })
    }
}

#[async_trait]
impl LocalSource for StdinSource {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv().await {
                Some(chunk) => self.pending = chunk?,
                None => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

/// Ends the stream once the operator types a detach sequence.
///
/// Bytes before the sequence's final byte are passed on; the final byte is
/// swallowed and every later read reports end of stream. Matching spans
/// read boundaries.
pub struct DetachSource<S> {
    inner: S,
    sequence: Vec<u8>,
    recent: Vec<u8>,
    detached: bool,
}

impl<S> DetachSource<S> {
    /// Wrap `inner`; `None` or an empty sequence disables detection.
    #[must_use]
    pub fn new(inner: S, sequence: Option<&[u8]>) -> Self {
        Self {
            inner,
            sequence: sequence.map(<[u8]>::to_vec).unwrap_or_default(),
            recent: Vec::new(),
            detached: false,
        }
    }

    /// Whether the detach sequence has been seen.
    #[must_use]
    pub const fn detached(&self) -> bool {
        self.detached
    }
}

#[async_trait]
impl<S: LocalSource> LocalSource for DetachSource<S> {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.detached {
            return Ok(0);
        }
        let n = self.inner.read_chunk(buf).await?;
        if self.sequence.is_empty() {
            return Ok(n);
        }

        for (i, byte) in buf[..n].iter().enumerate() {
            self.recent.push(*byte);
            if self.recent.len() > self.sequence.len() {
                self.recent.remove(0);
            }
            if self.recent == self.sequence {
                tracing::info!("Detach sequence typed, ending session");
                self.detached = true;
                return Ok(i);
            }
        }
        Ok(n)
    }
}
