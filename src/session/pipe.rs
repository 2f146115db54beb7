//! Pipe-backed shell sessions.
//!
//! A [`PipeSession`] owns a shell subprocess wired up over stdio pipes and a
//! background reader task that drains the child's output, line by line, into
//! the session's queue. Reads from the queue never block; a stop request is
//! noticed by the reader within one poll interval.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::shell;
use super::{SessionError, SessionId};

/// Marker pushed onto the output queue when a clear-screen command is sent.
///
/// Consumers that render session output should clear their display when they
/// encounter this marker and strip it from the text. It is queued before the
/// command is written, so it always precedes the command's own output.
pub const CLEAR_SCREEN_MARKER: &str = "[CLEAR_SCREEN]\n";

/// How long the reader idles between polls when no output is ready.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long stop() waits for the child to exit before force-killing it.
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long stop() waits for the reader task to finish.
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A shell subprocess with piped stdio and queued output capture.
///
/// The session is constructed without a process; [`PipeSession::start`]
/// spawns the shell and the reader task. The output queue is created once at
/// construction and survives stop/start cycles, so output queued before a
/// restart is still drained afterwards.
pub struct PipeSession {
    /// Unique session identifier.
    id: SessionId,

    /// Directory the shell is spawned in. Must exist at start time.
    working_dir: PathBuf,

    /// Shell program to spawn.
    shell: String,

    /// The child process, present only while a shell is spawned.
    child: Option<Child>,

    /// Write end of the child's stdin.
    stdin: Option<ChildStdin>,

    /// Queue producer, shared with the reader task. The owning side also
    /// pushes the clear-screen marker through it.
    output_tx: mpsc::UnboundedSender<String>,

    /// Queue consumer, drained by [`PipeSession::get_output`].
    output_rx: mpsc::UnboundedReceiver<String>,

    /// Set to ask the reader task to exit.
    stop_requested: Arc<AtomicBool>,

    /// Handle for the reader task, joined on stop.
    reader: Option<JoinHandle<()>>,
}

impl PipeSession {
    /// Creates a session that will run `shell` in `working_dir`.
    ///
    /// The process is not spawned until [`PipeSession::start`] is called.
    pub fn new(id: SessionId, working_dir: PathBuf, shell: String) -> Self {
        let (output_tx, output_rx) = mpsc::unbounded_channel();

        Self {
            id,
            working_dir,
            shell,
            child: None,
            stdin: None,
            output_tx,
            output_rx,
            stop_requested: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the session's working directory.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Spawns the shell and the background reader task.
    ///
    /// Fails with [`SessionError::WorkingDirNotFound`] when the working
    /// directory does not exist; the check runs before anything is spawned.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if !self.working_dir.exists() {
            return Err(SessionError::WorkingDirNotFound(self.working_dir.clone()));
        }

        let mut child = Command::new(&self.shell)
            .args(shell::startup_args(&self.shell, false))
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::SpawnFailed("stdout pipe unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SessionError::SpawnFailed("stderr pipe unavailable".to_string()))?;
        self.stdin = child.stdin.take();

        self.stop_requested.store(false, Ordering::SeqCst);
        self.reader = Some(spawn_read_loop(
            self.id.clone(),
            stdout,
            stderr,
            self.output_tx.clone(),
            Arc::clone(&self.stop_requested),
        ));
        self.child = Some(child);

        tracing::info!(session_id = %self.id, shell = %self.shell, "Session started");
        Ok(())
    }

    /// Writes a command line to the shell's stdin.
    ///
    /// Clear-screen commands (`cls`, `clear`, matched case-insensitively on
    /// the trimmed text) additionally push [`CLEAR_SCREEN_MARKER`] onto the
    /// output queue before the write happens.
    pub async fn send_command(&mut self, command: &str) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::NotRunning(self.id.clone()));
        }

        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Err(SessionError::EmptyCommand);
        }

        if trimmed.eq_ignore_ascii_case("cls") || trimmed.eq_ignore_ascii_case("clear") {
            // Queued before the write so the marker precedes any output the
            // command itself produces.
            let _ = self.output_tx.send(CLEAR_SCREEN_MARKER.to_string());
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SessionError::NotRunning(self.id.clone()))?;
        stdin.write_all(command.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        tracing::debug!(session_id = %self.id, "Command sent");
        Ok(())
    }

    /// Drains everything currently queued, without blocking.
    ///
    /// Returns an empty string when no output is pending. Never fails; a
    /// stopped session simply has nothing new to drain.
    pub fn get_output(&mut self) -> String {
        let mut output = String::new();
        while let Ok(chunk) = self.output_rx.try_recv() {
            output.push_str(&chunk);
        }
        output
    }

    /// Stops the session: asks the reader to exit, terminates the shell
    /// (escalating to a kill after [`TERMINATE_TIMEOUT`]) and joins the
    /// reader task. Safe to call when nothing is running, and never fails.
    pub async fn stop(&mut self) {
        self.stop_requested.store(true, Ordering::SeqCst);

        // Closing stdin hands the shell an EOF before any signal arrives.
        self.stdin = None;

        if let Some(mut child) = self.child.take() {
            terminate_child(&self.id, &mut child).await;
        }

        if let Some(reader) = self.reader.take() {
            if timeout(READER_JOIN_TIMEOUT, reader).await.is_err() {
                tracing::warn!(session_id = %self.id, "Reader task did not finish in time");
            }
        }

        tracing::info!(session_id = %self.id, "Session stopped");
    }

    /// Returns whether the shell process is alive.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

/// Graceful termination: SIGTERM where available, then a bounded wait, then
/// a hard kill. All failures are logged and swallowed.
async fn terminate_child(id: &SessionId, child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::debug!(session_id = %id, error = %e, "SIGTERM failed");
            }
        }
    }

    match timeout(TERMINATE_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(session_id = %id, code = ?status.code(), "Process exited");
        }
        Ok(Err(e)) => {
            tracing::warn!(session_id = %id, error = %e, "Error waiting for process");
        }
        Err(_) => {
            tracing::warn!(session_id = %id, "Process did not exit in time, killing");
            if let Err(e) = child.kill().await {
                tracing::warn!(session_id = %id, error = %e, "Failed to kill process");
            }
        }
    }
}

/// Spawns the reader task: one task per session, draining stdout and stderr
/// line readers into the output queue until EOF, an error, or a stop
/// request.
fn spawn_read_loop(
    id: SessionId,
    stdout: ChildStdout,
    stderr: ChildStderr,
    output_tx: mpsc::UnboundedSender<String>,
    stop_requested: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();
        let mut stdout_open = true;
        let mut stderr_open = true;

        loop {
            if stop_requested.load(Ordering::SeqCst) {
                tracing::debug!(session_id = %id, "Read loop stopping: stop requested");
                break;
            }
            if !stdout_open && !stderr_open {
                tracing::debug!(session_id = %id, "Read loop stopping: output streams closed");
                break;
            }

            tokio::select! {
                line = stdout.next_line(), if stdout_open => match line {
                    Ok(Some(mut line)) => {
                        line.push('\n');
                        let _ = output_tx.send(line);
                    }
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        tracing::warn!(session_id = %id, error = %e, "Error reading stdout");
                        break;
                    }
                },
                line = stderr.next_line(), if stderr_open => match line {
                    Ok(Some(mut line)) => {
                        line.push('\n');
                        let _ = output_tx.send(line);
                    }
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        tracing::warn!(session_id = %id, error = %e, "Error reading stderr");
                        break;
                    }
                },
                // Idle tick so a stop request is noticed within one poll
                // interval even when the shell produces nothing.
                _ = tokio::time::sleep(READ_POLL_INTERVAL) => {}
            }
        }
    })
}
