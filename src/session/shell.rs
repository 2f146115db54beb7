//! Shell detection and invocation profiles.
//!
//! Sessions spawn a configurable shell program. This module resolves the
//! platform default and the startup flags that keep a freshly spawned shell
//! quiet (no banner, no user profile scripts).

use std::path::Path;

/// Returns the default shell for the current platform.
///
/// On Windows this is `powershell.exe`. Elsewhere the `$SHELL` environment
/// variable is used, falling back to `/bin/sh`.
pub fn default_shell() -> String {
    if cfg!(windows) {
        "powershell.exe".to_string()
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

/// Returns whether the target platform can allocate pseudo-terminals.
///
/// Pty-backed sessions refuse to construct when this is false.
pub fn pty_supported() -> bool {
    cfg!(any(unix, windows))
}

/// Builds the startup argument list for a shell program.
///
/// The flags suppress startup banners and profile scripts so session output
/// starts clean. Pipe-backed sessions pass `interactive = false`, which adds
/// the non-interactive flag on shells that have one; pty-backed sessions
/// keep the shell interactive.
pub fn startup_args(program: &str, interactive: bool) -> Vec<String> {
    match shell_name(program).as_str() {
        "powershell" | "powershell.exe" | "pwsh" | "pwsh.exe" => {
            let mut args = vec!["-NoLogo".to_string(), "-NoProfile".to_string()];
            if !interactive {
                args.push("-NonInteractive".to_string());
            }
            args
        }
        "bash" | "bash.exe" => vec!["--noprofile".to_string(), "--norc".to_string()],
        "zsh" => vec!["--no-rcs".to_string()],
        _ => Vec::new(),
    }
}

/// Extracts the lowercased executable name from a shell program string,
/// which may be a bare name or a full path.
fn shell_name(program: &str) -> String {
    Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_else(|| program.to_ascii_lowercase())
}
