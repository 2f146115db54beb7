//! Shell session management.
//!
//! Two session flavors share one registry:
//!
//! - [`PipeSession`]: a non-interactive shell on plain pipes, with merged
//!   stdout/stderr and a clear-screen marker woven into the output stream.
//! - [`PtySession`]: an interactive shell on a pseudo-terminal.
//!
//! [`SessionRegistry`] owns the sessions, enforces the capacity limit and
//! hands out shared handles.

use thiserror::Error;

pub mod pipe;
pub mod pty;
pub mod registry;
pub mod shell;

pub use pipe::{PipeSession, CLEAR_SCREEN_MARKER};
pub use pty::PtySession;
pub use registry::SessionRegistry;

/// Unique identifier for a session.
pub type SessionId = String;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The platform cannot allocate pseudo-terminals.
    #[error("pseudo-terminals are not supported on this platform")]
    PtyUnsupported,

    /// The session was not found.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// A session with this ID already exists.
    #[error("session already exists: {0}")]
    DuplicateId(SessionId),

    /// The registry is at its session cap.
    #[error("maximum number of sessions reached ({max})")]
    CapacityExceeded { max: usize },

    /// The shell process is not alive.
    #[error("session is not running: {0}")]
    NotRunning(SessionId),

    /// The command was blank after trimming.
    #[error("command is empty")]
    EmptyCommand,

    /// The working directory does not exist.
    #[error("working directory not found: {}", .0.display())]
    WorkingDirNotFound(std::path::PathBuf),

    /// The shell executable could not be resolved.
    #[error("shell not found: {0}")]
    ShellNotFound(String),

    /// Spawning the shell failed for another reason.
    #[error("failed to spawn shell: {0}")]
    SpawnFailed(String),

    /// Writing to the shell's input failed.
    #[error("failed to write to shell: {0}")]
    WriteFailed(String),

    /// An I/O error from the process layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A managed shell session, either pipe-backed or pty-backed.
///
/// The variants are public: operations the flavors share live here, while
/// flavor-specific output access (draining a [`PipeSession`], reading a
/// [`PtySession`] with a timeout) goes through matching on the variant.
pub enum Session {
    Pipe(PipeSession),
    Pty(PtySession),
}

impl Session {
    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        match self {
            Session::Pipe(s) => s.id(),
            Session::Pty(s) => s.id(),
        }
    }

    /// Returns the session's working directory.
    pub fn working_dir(&self) -> &std::path::Path {
        match self {
            Session::Pipe(s) => s.working_dir(),
            Session::Pty(s) => s.working_dir(),
        }
    }

    /// Returns whether this is a pty-backed interactive session.
    pub fn is_interactive(&self) -> bool {
        matches!(self, Session::Pty(_))
    }

    /// Spawns the shell and starts capturing output.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        match self {
            Session::Pipe(s) => s.start().await,
            Session::Pty(s) => s.start(),
        }
    }

    /// Sends a command line to the shell.
    pub async fn send_command(&mut self, command: &str) -> Result<(), SessionError> {
        match self {
            Session::Pipe(s) => s.send_command(command).await,
            Session::Pty(s) => s.send_command(command),
        }
    }

    /// Stops the session and reaps the shell process. Never fails.
    pub async fn stop(&mut self) {
        match self {
            Session::Pipe(s) => s.stop().await,
            Session::Pty(s) => s.stop().await,
        }
    }

    /// Returns whether the shell process is alive.
    pub fn is_running(&mut self) -> bool {
        match self {
            Session::Pipe(s) => s.is_running(),
            Session::Pty(s) => s.is_running(),
        }
    }
}
