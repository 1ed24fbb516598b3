//! Shell command lines.

use std::path::PathBuf;

use thiserror::Error;

use crate::shell::{get_interactive_shell, resolve_executable_path};

/// Command error.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command line cannot be parsed: {0}")]
    InvalidLine(String),
    #[error("Command line is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
}

/// Program plus arguments to run on the pseudo-terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellCommand {
    /// Create a command from parts.
    #[must_use]
    pub fn new<S: Into<String>>(program: S, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a command line with shell quoting rules, e.g. `bash --norc`.
    ///
    /// # Errors
    /// Returns error if quoting is unbalanced or the line is empty.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut parts = split_command_line(line)?;
        if parts.is_empty() {
            return Err(CommandError::EmptyCommand);
        }
        let program = parts.remove(0);
        Ok(Self::new(program, parts))
    }

    /// The platform's interactive shell with no arguments.
    pub async fn interactive() -> Self {
        let shell = get_interactive_shell().await;
        Self::new(shell.to_string_lossy().into_owned(), Vec::new())
    }

    /// Parse `line` if given, otherwise use the interactive shell.
    ///
    /// # Errors
    /// Returns error if `line` does not parse.
    pub async fn from_config(line: Option<&str>) -> Result<Self, CommandError> {
        match line {
            Some(line) => Self::parse(line),
            None => Ok(Self::interactive().await),
        }
    }

    /// Resolve the program to an absolute path.
    ///
    /// # Errors
    /// Returns error if the executable cannot be found.
    pub async fn into_resolved(self) -> Result<(PathBuf, Vec<String>), CommandError> {
        let Self { program, args } = self;
        let executable = resolve_executable_path(&program)
            .await
            .ok_or(CommandError::ExecutableNotFound(program))?;
        Ok((executable, args))
    }
}

fn split_command_line(input: &str) -> Result<Vec<String>, CommandError> {
    shlex::split(input).ok_or_else(|| CommandError::InvalidLine(input.to_string()))
}
