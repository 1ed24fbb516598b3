//! Shell discovery.

use std::path::{Path, PathBuf};

/// Shell used when `$SHELL` is unset or unusable.
pub const FALLBACK_UNIX_SHELL: &str = "/bin/sh";

/// The interactive shell for the current platform.
///
/// Windows: PowerShell when it is on `PATH`, otherwise cmd.exe.
/// Unix: `$SHELL` if it names an existing absolute path, otherwise
/// [`FALLBACK_UNIX_SHELL`].
pub async fn get_interactive_shell() -> PathBuf {
    if cfg!(windows) {
        resolve_executable_path("powershell.exe")
            .await
            .unwrap_or_else(|| PathBuf::from("cmd.exe"))
    } else {
        user_shell(std::env::var_os("SHELL").as_deref().map(Path::new))
    }
}

fn user_shell(configured: Option<&Path>) -> PathBuf {
    match configured {
        Some(path) if path.is_absolute() && path.is_file() => path.to_path_buf(),
        Some(path) => {
            tracing::debug!(shell = %path.display(), "Ignoring unusable $SHELL");
            PathBuf::from(FALLBACK_UNIX_SHELL)
        }
        None => PathBuf::from(FALLBACK_UNIX_SHELL),
    }
}

/// Resolve an executable by name.
///
/// Absolute paths are accepted if they name an existing file; anything else
/// is looked up on the current `PATH`.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    let name = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(name))
        .await
        .ok()
        .and_then(Result::ok)
}
