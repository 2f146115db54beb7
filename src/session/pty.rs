//! Pty-backed shell sessions.
//!
//! A [`PtySession`] runs the shell on a pseudo-terminal so it behaves as it
//! would in a real terminal: prompts, input echo, programs that insist on a
//! tty. Output is captured by a blocking read loop feeding the session's
//! queue in small fixed-size chunks.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

use super::shell;
use super::{SessionError, SessionId};

/// Buffer size for reads from the PTY.
const READ_BUFFER_SIZE: usize = 1024;

/// Per-item wait while collecting output under a deadline.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long stop() waits for the reader task before killing the child.
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Fixed terminal dimensions; sessions have no resize surface.
const PTY_ROWS: u16 = 24;
const PTY_COLS: u16 = 80;

/// An interactive shell session backed by a pseudo-terminal.
///
/// Construction fails on platforms without pty support. The environment the
/// shell will see is snapshotted when the session object is created, not
/// when it is started.
pub struct PtySession {
    /// Unique session identifier.
    id: SessionId,

    /// Directory the shell is spawned in, passed through to the pty spawn.
    working_dir: PathBuf,

    /// Shell program to spawn.
    shell: String,

    /// Environment snapshot taken at construction time.
    env: Vec<(String, String)>,

    /// The child process, present only while a shell is spawned.
    child: Option<Box<dyn Child + Send + Sync>>,

    /// The PTY master handle. Dropped on stop to close the terminal.
    master: Option<Box<dyn MasterPty + Send>>,

    /// The writer for the PTY.
    writer: Option<Box<dyn Write + Send>>,

    /// Queue producer, cloned into the reader task.
    output_tx: mpsc::UnboundedSender<String>,

    /// Queue consumer, drained by [`PtySession::read_output`].
    output_rx: mpsc::UnboundedReceiver<String>,

    /// Set to ask the reader task to exit.
    stop_requested: Arc<AtomicBool>,

    /// Handle for the reader task, joined on stop.
    reader: Option<JoinHandle<()>>,
}

impl PtySession {
    /// Creates a session that will run `shell` in `working_dir` on a
    /// pseudo-terminal.
    ///
    /// Fails with [`SessionError::PtyUnsupported`] when the platform cannot
    /// allocate ptys. The process is not spawned until
    /// [`PtySession::start`] is called.
    pub fn new(id: SessionId, working_dir: PathBuf, shell: String) -> Result<Self, SessionError> {
        if !shell::pty_supported() {
            return Err(SessionError::PtyUnsupported);
        }

        let env: Vec<(String, String)> = std::env::vars().collect();
        let (output_tx, output_rx) = mpsc::unbounded_channel();

        Ok(Self {
            id,
            working_dir,
            shell,
            env,
            child: None,
            master: None,
            writer: None,
            output_tx,
            output_rx,
            stop_requested: Arc::new(AtomicBool::new(false)),
            reader: None,
        })
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the session's working directory.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Spawns the shell on a fresh pty and starts the read loop.
    ///
    /// A missing shell executable maps to [`SessionError::ShellNotFound`];
    /// every other spawn failure maps to [`SessionError::SpawnFailed`].
    pub fn start(&mut self) -> Result<(), SessionError> {
        if which::which(&self.shell).is_err() {
            return Err(SessionError::ShellNotFound(self.shell.clone()));
        }

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: PTY_ROWS,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&self.shell);
        for arg in shell::startup_args(&self.shell, true) {
            cmd.arg(arg);
        }
        cmd.cwd(&self.working_dir);

        // The snapshot from construction time replaces whatever the
        // environment looks like at spawn time.
        cmd.env_clear();
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        self.stop_requested.store(false, Ordering::SeqCst);
        self.reader = Some(spawn_read_loop(
            self.id.clone(),
            reader,
            self.output_tx.clone(),
            Arc::clone(&self.stop_requested),
        ));
        self.master = Some(pair.master);
        self.writer = Some(writer);
        self.child = Some(child);

        tracing::info!(session_id = %self.id, shell = %self.shell, "Interactive session started");
        Ok(())
    }

    /// Writes a command line to the pty.
    ///
    /// The text goes through verbatim with a newline appended; the pty layer
    /// handles echo and line discipline.
    pub fn send_command(&mut self, command: &str) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::NotRunning(self.id.clone()));
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SessionError::NotRunning(self.id.clone()))?;
        writer
            .write_all(command.as_bytes())
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;
        writer
            .write_all(b"\n")
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;

        tracing::debug!(session_id = %self.id, "Command sent");
        Ok(())
    }

    /// Collects output from the queue.
    ///
    /// With `timeout: None` this drains whatever is queued and returns
    /// immediately. With `Some(window)` it keeps polling the queue with a
    /// [`READ_POLL_INTERVAL`] per-item wait until the window has elapsed,
    /// blocking the caller for up to that long.
    ///
    /// Fails with [`SessionError::NotRunning`] when the shell is not alive.
    pub async fn read_output(&mut self, timeout: Option<Duration>) -> Result<String, SessionError> {
        if !self.is_running() {
            return Err(SessionError::NotRunning(self.id.clone()));
        }

        let mut output = String::new();

        match timeout {
            None => {
                while let Ok(chunk) = self.output_rx.try_recv() {
                    output.push_str(&chunk);
                }
            }
            Some(window) => {
                let deadline = Instant::now() + window;
                while Instant::now() < deadline {
                    match time::timeout(READ_POLL_INTERVAL, self.output_rx.recv()).await {
                        Ok(Some(chunk)) => output.push_str(&chunk),
                        Ok(None) => break,
                        Err(_) => continue,
                    }
                }
            }
        }

        Ok(output)
    }

    /// Stops the session: asks the reader to exit, joins it with a bounded
    /// wait, then force-terminates the child. Termination failures are
    /// swallowed; stopping never fails.
    pub async fn stop(&mut self) {
        self.stop_requested.store(true, Ordering::SeqCst);

        if let Some(reader) = self.reader.take() {
            if time::timeout(READER_JOIN_TIMEOUT, reader).await.is_err() {
                tracing::debug!(session_id = %self.id, "Reader still blocked on the pty, killing child");
            }
        }

        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                tracing::debug!(session_id = %self.id, error = %e, "Kill failed");
            }
            let _ = child.wait();
        }

        self.writer = None;
        self.master = None;

        tracing::info!(session_id = %self.id, "Interactive session stopped");
    }

    /// Returns whether the shell process is alive.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

/// Spawns the read loop: blocking fixed-size reads from the pty, forwarded
/// to the output queue as UTF-8 text (lossily converted). EOF, a read error
/// or a stop request ends the loop.
fn spawn_read_loop(
    id: SessionId,
    reader: Box<dyn Read + Send>,
    output_tx: mpsc::UnboundedSender<String>,
    stop_requested: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Wrap the reader for the blocking task
        let reader = Arc::new(std::sync::Mutex::new(reader));

        loop {
            if stop_requested.load(Ordering::SeqCst) {
                tracing::debug!(session_id = %id, "Read loop stopping: stop requested");
                break;
            }

            let reader_clone = Arc::clone(&reader);
            let result = tokio::task::spawn_blocking(move || {
                let mut buffer = vec![0u8; READ_BUFFER_SIZE];
                let mut reader = reader_clone.lock().unwrap();
                match reader.read(&mut buffer) {
                    Ok(0) => Ok(None), // EOF
                    Ok(n) => {
                        buffer.truncate(n);
                        Ok(Some(buffer))
                    }
                    Err(e) => Err(e),
                }
            })
            .await;

            match result {
                Ok(Ok(Some(data))) => {
                    let chunk = String::from_utf8_lossy(&data).into_owned();
                    if output_tx.send(chunk).is_err() {
                        tracing::debug!(session_id = %id, "Output queue dropped, stopping read loop");
                        break;
                    }
                }
                Ok(Ok(None)) => {
                    tracing::info!(session_id = %id, "PTY EOF, process exited");
                    break;
                }
                Ok(Err(e)) => {
                    // Reads fail with EIO once the child is killed; only
                    // unexpected failures are worth a warning.
                    if !stop_requested.load(Ordering::SeqCst) {
                        tracing::warn!(session_id = %id, error = %e, "Error reading from PTY");
                    }
                    break;
                }
                Err(e) => {
                    tracing::error!(session_id = %id, error = %e, "Read task panicked");
                    break;
                }
            }
        }
    })
}
