//! In-memory stand-in for the console, used by `--simulation` and tests.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::error::BackupError;
use crate::core::remote::{ConnectionParams, RemoteConnector, RemoteSession};

/// Where a simulated run should break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFailure {
    Connect,
    Auth,
    List,
    /// The stream dies after this many bytes.
    Transfer { after: usize },
}

impl SimulatedFailure {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "connect" => Some(Self::Connect),
            "auth" => Some(Self::Auth),
            "list" => Some(Self::List),
            "transfer" => Some(Self::Transfer { after: 0 }),
            _ => None,
        }
    }
}

#[derive(Default)]
struct RemoteState {
    files: BTreeMap<String, Vec<u8>>,
    failure: Option<SimulatedFailure>,
    connects: usize,
    open_sessions: usize,
}

/// Shared handle; clone it to keep controlling the remote after handing it out.
#[derive(Clone, Default)]
pub struct SimulatedRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl SimulatedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_file(&self, name: &str, contents: impl Into<Vec<u8>>) {
        self.state().files.insert(name.to_string(), contents.into());
    }

    pub fn remove_file(&self, name: &str) {
        self.state().files.remove(name);
    }

    pub fn set_failure(&self, failure: Option<SimulatedFailure>) {
        self.state().failure = failure;
    }

    pub fn files(&self) -> Vec<String> {
        self.state().files.keys().cloned().collect()
    }

    /// Successful handshakes so far.
    pub fn connects(&self) -> usize {
        self.state().connects
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.state().open_sessions
    }
}

impl RemoteConnector for SimulatedRemote {
    fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn RemoteSession>, BackupError> {
        let mut state = self.state();
        match state.failure {
            Some(SimulatedFailure::Connect) => {
                return Err(BackupError::Connection(format!(
                    "{}: connection refused",
                    params.address()
                )));
            }
            Some(SimulatedFailure::Auth) => {
                return Err(BackupError::Authentication(format!(
                    "{}@{}: password rejected",
                    params.user, params.host
                )));
            }
            _ => {}
        }
        state.connects += 1;
        state.open_sessions += 1;
        Ok(Box::new(SimulatedSession {
            remote: self.clone(),
            closed: false,
        }))
    }
}

struct SimulatedSession {
    remote: SimulatedRemote,
    closed: bool,
}

impl RemoteSession for SimulatedSession {
    fn list_dir(&mut self, dir: &str) -> Result<Vec<String>, BackupError> {
        let state = self.remote.state();
        if state.failure == Some(SimulatedFailure::List) {
            return Err(BackupError::DirectoryList(format!("{}: permission denied", dir)));
        }
        Ok(state.files.keys().cloned().collect())
    }

    fn open(&mut self, path: &str) -> Result<Box<dyn Read + Send>, BackupError> {
        let state = self.remote.state();
        let name = path.rsplit('/').next().unwrap_or(path);
        let data = state
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| BackupError::Transfer(format!("{}: no such file", path)))?;

        match state.failure {
            Some(SimulatedFailure::Transfer { after }) => Ok(Box::new(BrokenStream {
                inner: Cursor::new(data),
                remaining: after,
            })),
            _ => Ok(Box::new(Cursor::new(data))),
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.remote.state();
        state.open_sessions = state.open_sessions.saturating_sub(1);
    }
}

impl Drop for SimulatedSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Yields `remaining` bytes, then errors.
struct BrokenStream {
    inner: Cursor<Vec<u8>>,
    remaining: usize,
}

impl Read for BrokenStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "channel closed by peer",
            ));
        }
        let len = buf.len().min(self.remaining);
        let n = self.inner.read(&mut buf[..len])?;
        self.remaining -= n;
        if n == 0 {
            self.remaining = 0;
        }
        Ok(n)
    }
}
