//! Cross-platform shell processes on pseudo-terminals.
//!
//! Provides:
//! - `ShellProcess` - A shell on a PTY with split output/input handles
//! - `ShellCommand` - Command line parsing and executable resolution
//! - Shell detection utilities for Unix and Windows

pub mod command;
pub mod process;
pub mod shell;

pub use command::{CommandError, ShellCommand};
pub use process::{PtyError, PtyInput, PtyOptions, PtyOutput, ShellProcess};
pub use shell::{get_interactive_shell, resolve_executable_path};
