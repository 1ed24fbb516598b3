//! A shell process attached to a pseudo-terminal.

use std::{
    io::{ErrorKind, Read, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::command::{CommandError, ShellCommand};

/// Chunks buffered between the reader thread and the consumer.
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// PTY error.
#[derive(Debug, Error)]
pub enum PtyError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("Failed to open pseudo-terminal: {0}")]
    Open(String),
    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },
    #[error("Pseudo-terminal {0} already taken")]
    AlreadyTaken(&'static str),
    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal settings for a spawned shell.
#[derive(Debug, Clone)]
pub struct PtyOptions {
    pub cols: u16,
    pub rows: u16,
    /// Working directory; the home directory when unset.
    pub cwd: Option<PathBuf>,
    /// Value of `TERM` in the shell's environment.
    pub term: String,
}

impl Default for PtyOptions {
    fn default() -> Self {
        Self {
            cols: 100,
            rows: 30,
            cwd: None,
            term: "xterm-256color".to_string(),
        }
    }
}

/// A spawned shell and the master side of its pseudo-terminal.
///
/// The slave side is released right after the spawn, so once the shell and
/// anything it started exit, reads on the master report end of stream.
pub struct ShellProcess {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    program: String,
    output_taken: bool,
    input_taken: bool,
}

impl ShellProcess {
    /// Resolve `command` and spawn it on a fresh pseudo-terminal.
    ///
    /// # Errors
    /// Returns error if the executable is missing or the spawn fails.
    pub async fn spawn(command: ShellCommand, options: &PtyOptions) -> Result<Self, PtyError> {
        let (executable, args) = command.into_resolved().await?;
        let program = executable.to_string_lossy().into_owned();

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&executable);
        cmd.args(&args);
        cmd.env("TERM", &options.term);
        if let Some(cwd) = options.cwd.clone().or_else(dirs::home_dir) {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn {
                program: program.clone(),
                reason: e.to_string(),
            })?;
        drop(pair.slave);

        let killer = child.clone_killer();
        tracing::info!(
            program = %program,
            pid = ?child.process_id(),
            cols = options.cols,
            rows = options.rows,
            "Shell spawned"
        );

        Ok(Self {
            master: pair.master,
            child,
            killer,
            program,
            output_taken: false,
            input_taken: false,
        })
    }

    /// Resolved path of the running program.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Start forwarding shell output, at most `read_size` bytes per chunk.
    ///
    /// A dedicated thread performs the blocking reads.
    ///
    /// # Errors
    /// Returns error if the output was already taken or the reader cannot
    /// be cloned.
    pub fn take_output(&mut self, read_size: usize) -> Result<PtyOutput, PtyError> {
        if self.output_taken {
            return Err(PtyError::AlreadyTaken("output"));
        }
        let reader = self
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Open(e.to_string()))?;
        self.output_taken = true;

        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        std::thread::Builder::new()
            .name("pty-reader".to_string())
            .spawn(move || read_master(reader, read_size.max(1), &tx))?;

        Ok(PtyOutput {
            rx,
            pending: Vec::new(),
        })
    }

    /// Writer for injecting input into the shell.
    ///
    /// # Errors
    /// Returns error if the input was already taken.
    pub fn take_input(&mut self) -> Result<PtyInput, PtyError> {
        if self.input_taken {
            return Err(PtyError::AlreadyTaken("input"));
        }
        let writer = self
            .master
            .take_writer()
            .map_err(|e| PtyError::Open(e.to_string()))?;
        self.input_taken = true;

        Ok(PtyInput {
            writer: Arc::new(Mutex::new(writer)),
        })
    }

    /// Take both ends of the pseudo-terminal at once.
    ///
    /// The shell is killed if either end cannot be taken, so a failed
    /// setup never leaves it running unattended.
    ///
    /// # Errors
    /// Returns error if [`Self::take_output`] or [`Self::take_input`] fails.
    pub fn take_io(&mut self, read_size: usize) -> Result<(PtyOutput, PtyInput), PtyError> {
        let taken = self
            .take_output(read_size)
            .and_then(|output| Ok((output, self.take_input()?)));
        if let Err(e) = &taken {
            tracing::warn!(program = %self.program, "Killing shell after failed setup: {e}");
            self.kill();
        }
        taken
    }

    /// Terminate the shell. Killing an already exited shell is not an error.
    pub fn kill(&mut self) {
        if let Err(e) = self.killer.kill() {
            tracing::debug!(program = %self.program, "Kill failed (already exited?): {e}");
        }
    }

    /// Wait for the shell to exit and return its exit code.
    ///
    /// # Errors
    /// Returns error if waiting on the child fails.
    pub async fn wait(self) -> Result<u32, PtyError> {
        let Self {
            master,
            mut child,
            program,
            ..
        } = self;

        let status = tokio::task::spawn_blocking(move || child.wait())
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))??;
        drop(master);

        let code = status.exit_code();
        tracing::info!(program = %program, code, "Shell exited");
        Ok(code)
    }
}

fn read_master(mut reader: Box<dyn Read + Send>, read_size: usize, tx: &mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; read_size];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            // Linux reports EIO on the master once the slave side is gone.
            Err(e) => {
                tracing::debug!("PTY read ended: {e}");
                break;
            }
        }
    }
}

/// Shell output as a stream of chunks.
///
/// Dropping the last sender (the reader thread) marks end of stream.
pub struct PtyOutput {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl PtyOutput {
    /// Read up to `buf.len()` bytes. Returns 0 once the shell has exited.
    ///
    /// Cancel safe: a chunk is only taken from the channel when it can be
    /// stored, and leftovers are kept for the next call.
    pub async fn read(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        if self.pending.is_empty() {
            match self.rx.recv().await {
                Some(chunk) => self.pending = chunk,
                None => return 0,
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }
}

/// Input side of the pseudo-terminal.
#[derive(Clone)]
pub struct PtyInput {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl PtyInput {
    /// Write all bytes to the shell.
    ///
    /// # Errors
    /// Returns error if the write fails.
    pub async fn write_all(&self, bytes: &[u8]) -> std::io::Result<()> {
        let writer = Arc::clone(&self.writer);
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut guard = writer
                .lock()
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            guard.write_all(&bytes)?;
            guard.flush()
        })
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?
    }
}
