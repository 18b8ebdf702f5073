//! Seams between the executor and whatever actually talks to the console.

use std::fmt;
use std::io::Read;

use super::error::BackupError;

/// A password that stays out of logs and `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub credential: Credential,
}

impl ConnectionParams {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Opens authenticated file-transfer sessions.
pub trait RemoteConnector: Send + Sync {
    /// Connect, verify the host, authenticate and open the transfer channel.
    fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn RemoteSession>, BackupError>;
}

/// An open session. Implementations must release the channel and then the
/// transport in `close`, and must tolerate `close` being called twice.
pub trait RemoteSession: Send {
    /// Bare file names in `dir`.
    fn list_dir(&mut self, dir: &str) -> Result<Vec<String>, BackupError>;

    fn open(&mut self, path: &str) -> Result<Box<dyn Read + Send>, BackupError>;

    fn close(&mut self);
}

/// Decides whether a host key presented during the handshake is acceptable.
pub trait HostKeyVerifier: Send + Sync {
    fn verify(&self, host: &str, port: u16, key: &[u8]) -> Result<(), BackupError>;
}

/// Join a remote directory and a file name with POSIX separators.
pub fn remote_path(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_is_redacted() {
        let params = ConnectionParams {
            host: "10.0.0.1".into(),
            port: 22,
            user: "root".into(),
            credential: Credential::new("hunter2"),
        };
        let rendered = format!("{:?}", params);
        assert!(!rendered.contains("hunter2"));
        assert_eq!(params.address(), "10.0.0.1:22");
    }

    #[test]
    fn remote_path_handles_trailing_slash() {
        assert_eq!(remote_path("/data/backup/", "a.unf"), "/data/backup/a.unf");
        assert_eq!(remote_path("/data/backup", "a.unf"), "/data/backup/a.unf");
    }
}
