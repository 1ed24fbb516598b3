//! Server endpoint: a shell on a pseudo-terminal.

use std::sync::Arc;

use queue_tunnel_core::{QueueTransport, SessionName, SessionStatus, TunnelConfig};
use queue_tunnel_pty::{PtyError, PtyOptions, ShellCommand, ShellProcess};

use crate::{
    Shutdown,
    error::SessionError,
    pump::{DuplexPump, PumpReport, PumpTiming, StopReason},
};

/// How a server session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutcome {
    pub report: PumpReport,
    /// Exit code of the shell, `None` if it could not be collected.
    pub exit_code: Option<u32>,
}

/// The server endpoint of a session.
pub struct ShellSession<T> {
    transport: Arc<T>,
    config: TunnelConfig,
    options: PtyOptions,
}

impl<T: QueueTransport + 'static> ShellSession<T> {
    #[must_use]
    pub fn new(transport: Arc<T>, config: TunnelConfig) -> Self {
        let options = PtyOptions {
            cols: config.cols,
            rows: config.rows,
            ..PtyOptions::default()
        };
        Self {
            transport,
            config,
            options,
        }
    }

    /// Override the terminal settings derived from the configuration.
    #[must_use]
    pub fn with_options(mut self, options: PtyOptions) -> Self {
        self.options = options;
        self
    }

    /// Spawn the shell and pump its I/O until it exits or `shutdown` is
    /// triggered.
    ///
    /// A shell still running when the pump stops is killed. The exit status
    /// is recorded in the session's status marker.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid, the shell cannot be
    /// spawned, or writing to the shell fails.
    pub async fn run(&self, shutdown: &Shutdown) -> Result<ShellOutcome, SessionError> {
        let session = self.config.validate()?;
        let command = ShellCommand::from_config(self.config.shell.as_deref())
            .await
            .map_err(PtyError::from)?;
        let codec = self.config.chunk_codec();

        let mut shell = ShellProcess::spawn(command, &self.options).await?;
        let (output, input) = shell.take_io(codec.read_size())?;
        tracing::info!(%session, program = shell.program(), "Server session started");

        self.record_status(&session, &SessionStatus::Connected).await;

        let pump = DuplexPump::server(
            Arc::clone(&self.transport),
            session.clone(),
            codec,
            PumpTiming::from_config(&self.config),
        );
        let result = pump.run(output, input, shutdown).await;

        if !matches!(&result, Ok(report) if report.read_stop == StopReason::EndOfStream) {
            shell.kill();
        }
        let exit_code = match shell.wait().await {
            Ok(code) => Some(code),
            Err(e) => {
                tracing::warn!(%session, "Failed to collect shell exit status: {e}");
                None
            }
        };
        self.record_status(&session, &SessionStatus::Exited { code: exit_code })
            .await;

        let report = result?;
        tracing::info!(%session, ?exit_code, "Server session ended");
        Ok(ShellOutcome { report, exit_code })
    }

    async fn record_status(&self, session: &SessionName, status: &SessionStatus) {
        if let Err(e) = self.transport.set_status(session, status).await {
            tracing::warn!(%session, ?status, "Failed to record session status: {e}");
        }
    }
}
