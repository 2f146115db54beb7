//! Session registry.
//!
//! Owns every live session behind a concurrent map and enforces the
//! session cap. Callers get `Arc<Mutex<Session>>` handles so a session can
//! be driven without holding the registry itself.

use std::path::Path;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::Config;

use super::{PipeSession, PtySession, Session, SessionError, SessionId};

/// Registry of active sessions, keyed by session ID.
pub struct SessionRegistry {
    /// Hard cap on concurrently tracked sessions.
    max_sessions: usize,

    /// Shell program new sessions run.
    default_shell: String,

    /// Live sessions.
    sessions: DashMap<SessionId, Arc<Mutex<Session>>>,
}

impl SessionRegistry {
    /// Creates a registry with the given capacity and shell.
    pub fn new(max_sessions: usize, default_shell: String) -> Self {
        Self {
            max_sessions,
            default_shell,
            sessions: DashMap::new(),
        }
    }

    /// Creates a registry from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.manager.max_sessions, config.shell.program.clone())
    }

    /// Creates a session and returns its handle. The shell is not spawned
    /// yet; callers start the session through the handle.
    ///
    /// Fails with [`SessionError::CapacityExceeded`] when the registry is
    /// full and with [`SessionError::DuplicateId`] when the ID is taken.
    /// The capacity check counts existing sessions, so deleting one always
    /// makes room for the next.
    pub fn create_session(
        &self,
        id: &str,
        working_dir: &Path,
        interactive: bool,
    ) -> Result<Arc<Mutex<Session>>, SessionError> {
        // Checked before taking the entry; len() visits every shard and
        // must not run while an entry guard is held.
        if self.sessions.len() >= self.max_sessions {
            return Err(SessionError::CapacityExceeded {
                max: self.max_sessions,
            });
        }

        match self.sessions.entry(id.to_string()) {
            Entry::Occupied(_) => Err(SessionError::DuplicateId(id.to_string())),
            Entry::Vacant(entry) => {
                let session = if interactive {
                    Session::Pty(PtySession::new(
                        id.to_string(),
                        working_dir.to_path_buf(),
                        self.default_shell.clone(),
                    )?)
                } else {
                    Session::Pipe(PipeSession::new(
                        id.to_string(),
                        working_dir.to_path_buf(),
                        self.default_shell.clone(),
                    ))
                };

                let handle = Arc::new(Mutex::new(session));
                entry.insert(Arc::clone(&handle));
                tracing::info!(session_id = %id, interactive, "Created session");
                Ok(handle)
            }
        }
    }

    /// Returns a handle to the session, if it exists.
    pub fn get_session(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Stops a session and removes it from the registry.
    ///
    /// Callers must not hold the session's lock when calling this; the
    /// shutdown path locks it to stop the shell.
    pub async fn delete_session(&self, id: &str) -> Result<(), SessionError> {
        let session = self
            .get_session(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        {
            let mut session = session.lock().await;
            session.stop().await;
        }

        self.sessions.remove(id);
        tracing::info!(session_id = %id, "Session deleted");
        Ok(())
    }

    /// Returns the IDs of all tracked sessions.
    pub fn list_sessions(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Returns the number of tracked sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Returns whether a session with this ID exists.
    pub fn exists(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Returns the session cap.
    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}
