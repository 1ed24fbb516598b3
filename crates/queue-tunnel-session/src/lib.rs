//! Session endpoints for queue-tunnel.
//!
//! Provides:
//! - `TerminalSession` - The client: raw-mode terminal to the `input` lane
//! - `ShellSession` - The server: PTY shell to the `output` lane
//! - `DuplexPump` - The read/write loop pair both endpoints run
//! - `Shutdown` - Cancellation shared by a session's loops

pub mod error;
pub mod local;
pub mod pump;
pub mod shell;
pub mod shutdown;
pub mod terminal;

pub use error::SessionError;
pub use local::{DetachSource, LocalSink, LocalSource, ReaderSource, StdinSource, WriterSink};
pub use pump::{DuplexPump, PumpError, PumpReport, PumpTiming, StopReason};
pub use shell::{ShellOutcome, ShellSession};
pub use shutdown::{Shutdown, TriggerOnDrop};
pub use terminal::{CrosstermMode, NoopMode, RawModeGuard, TerminalMode, TerminalSession};
