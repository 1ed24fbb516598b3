//! Client endpoint: the operator's terminal.
//!
//! The terminal is switched to raw mode for the lifetime of a
//! [`RawModeGuard`], so every keystroke (control sequences included)
//! reaches the remote shell as raw bytes. The guard restores the original
//! mode exactly once, on every exit path.

use std::{io, io::IsTerminal, sync::Arc};

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use queue_tunnel_core::{QueueTransport, SessionStatus, TunnelConfig};

use crate::{
    Shutdown,
    error::SessionError,
    local::{DetachSource, LocalSink, LocalSource, StdinSource, WriterSink},
    pump::{DuplexPump, PumpReport, PumpTiming},
};

/// Switches a terminal in and out of raw mode.
pub trait TerminalMode: Send {
    /// Capture the current mode and switch to raw mode.
    ///
    /// # Errors
    /// Returns error if the terminal cannot be configured.
    fn enter_raw(&mut self) -> io::Result<()>;

    /// Put back the mode captured by [`enter_raw`](Self::enter_raw).
    ///
    /// # Errors
    /// Returns error if the terminal cannot be configured.
    fn restore(&mut self) -> io::Result<()>;
}

impl<M: TerminalMode + ?Sized> TerminalMode for Box<M> {
    fn enter_raw(&mut self) -> io::Result<()> {
        (**self).enter_raw()
    }

    fn restore(&mut self) -> io::Result<()> {
        (**self).restore()
    }
}

/// The process's controlling terminal, via crossterm.
#[derive(Debug, Default)]
pub struct CrosstermMode;

impl TerminalMode for CrosstermMode {
    fn enter_raw(&mut self) -> io::Result<()> {
        enable_raw_mode()
    }

    fn restore(&mut self) -> io::Result<()> {
        disable_raw_mode()
    }
}

/// For stdin that is not a terminal (pipes, files).
#[derive(Debug, Default)]
pub struct NoopMode;

impl TerminalMode for NoopMode {
    fn enter_raw(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn restore(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Holds a terminal in raw mode until restored or dropped.
pub struct RawModeGuard<M: TerminalMode> {
    mode: M,
    active: bool,
}

impl<M: TerminalMode> RawModeGuard<M> {
    /// Switch `mode` to raw.
    ///
    /// # Errors
    /// Returns error if raw mode cannot be entered; nothing is left to
    /// restore in that case.
    pub fn enter(mut mode: M) -> io::Result<Self> {
        mode.enter_raw()?;
        tracing::debug!("Terminal in raw mode");
        Ok(Self { mode, active: true })
    }

    /// Restore the original mode. Later calls, and the drop, do nothing.
    ///
    /// # Errors
    /// Returns error if the terminal cannot be restored.
    pub fn restore(&mut self) -> io::Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        self.mode.restore()?;
        tracing::debug!("Terminal mode restored");
        Ok(())
    }
}

impl<M: TerminalMode> Drop for RawModeGuard<M> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            tracing::error!("Failed to restore terminal mode: {e}");
        }
    }
}

/// The client endpoint of a session.
pub struct TerminalSession<T> {
    transport: Arc<T>,
    config: TunnelConfig,
}

impl<T: QueueTransport + 'static> TerminalSession<T> {
    #[must_use]
    pub const fn new(transport: Arc<T>, config: TunnelConfig) -> Self {
        Self { transport, config }
    }

    /// Run against the process's stdin and stdout.
    ///
    /// Raw mode is only entered when stdin is a terminal.
    ///
    /// # Errors
    /// See [`run_with`](Self::run_with).
    pub async fn run(&self, shutdown: &Shutdown) -> Result<PumpReport, SessionError> {
        let mode: Box<dyn TerminalMode> = if io::stdin().is_terminal() {
            Box::new(CrosstermMode)
        } else {
            tracing::debug!("stdin is not a terminal, leaving its mode alone");
            Box::new(NoopMode)
        };
        let source = StdinSource::spawn(self.config.chunk_codec().read_size())
            .map_err(SessionError::Terminal)?;
        let sink = WriterSink(tokio::io::stdout());
        self.run_with(mode, source, sink, shutdown).await
    }

    /// Run with an explicit terminal mode, keystroke source and display.
    ///
    /// Returns once the source ends (including by the detach sequence), the
    /// display fails, or `shutdown` is triggered. The terminal is restored
    /// in every case.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid, raw mode cannot be
    /// entered, or the local source or display fails.
    pub async fn run_with<M, S, K>(
        &self,
        mode: M,
        source: S,
        sink: K,
        shutdown: &Shutdown,
    ) -> Result<PumpReport, SessionError>
    where
        M: TerminalMode,
        S: LocalSource + 'static,
        K: LocalSink + 'static,
    {
        let session = self.config.validate()?;
        let mut guard = RawModeGuard::enter(mode).map_err(SessionError::Terminal)?;
        tracing::info!(%session, "Client session started");

        if let Err(e) = self
            .transport
            .set_status(&session, &SessionStatus::ClientConnected)
            .await
        {
            tracing::warn!(%session, "Failed to record client status: {e}");
        }

        let source = DetachSource::new(source, self.config.detach_bytes());
        let pump = DuplexPump::client(
            Arc::clone(&self.transport),
            session.clone(),
            self.config.chunk_codec(),
            PumpTiming::from_config(&self.config),
        );
        let result = pump.run(source, sink, shutdown).await;

        if let Err(e) = guard.restore() {
            tracing::error!(%session, "Failed to restore terminal mode: {e}");
        }
        let report = result?;
        tracing::info!(%session, "Client session ended");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Clone, Default)]
    struct RecordingMode {
        events: Arc<Mutex<Vec<&'static str>>>,
        fail_enter: bool,
    }

    impl TerminalMode for RecordingMode {
        fn enter_raw(&mut self) -> io::Result<()> {
            if self.fail_enter {
                return Err(io::Error::other("not a tty"));
            }
            self.events.lock().unwrap().push("raw");
            Ok(())
        }

        fn restore(&mut self) -> io::Result<()> {
            self.events.lock().unwrap().push("restore");
            Ok(())
        }
    }

    #[test]
    fn test_guard_restores_on_drop() {
        let mode = RecordingMode::default();
        {
            let _guard = RawModeGuard::enter(mode.clone()).unwrap();
        }
        assert_eq!(*mode.events.lock().unwrap(), vec!["raw", "restore"]);
    }

    #[test]
    fn test_guard_restores_exactly_once() {
        let mode = RecordingMode::default();
        let mut guard = RawModeGuard::enter(mode.clone()).unwrap();
        guard.restore().unwrap();
        guard.restore().unwrap();
        drop(guard);
        assert_eq!(*mode.events.lock().unwrap(), vec!["raw", "restore"]);
    }

    #[test]
    fn test_failed_enter_restores_nothing() {
        let mode = RecordingMode {
            fail_enter: true,
            ..RecordingMode::default()
        };
        assert!(RawModeGuard::enter(mode.clone()).is_err());
        assert!(mode.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_boxed_mode() {
        let mode = RecordingMode::default();
        let boxed: Box<dyn TerminalMode> = Box::new(mode.clone());
        drop(RawModeGuard::enter(boxed).unwrap());
        assert_eq!(mode.events.lock().unwrap().len(), 2);
    }
}
