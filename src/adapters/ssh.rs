//! SSH + SFTP transport backed by libssh2.

use ssh2::{Session, Sftp};
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::error::BackupError;
use crate::core::remote::{ConnectionParams, HostKeyVerifier, RemoteConnector, RemoteSession};

pub struct SshConnector {
    verifier: Arc<dyn HostKeyVerifier>,
    timeout: Duration,
}

impl SshConnector {
    pub fn new(verifier: Arc<dyn HostKeyVerifier>, timeout: Duration) -> Self {
        Self { verifier, timeout }
    }

    fn open_tcp(&self, params: &ConnectionParams) -> Result<TcpStream, BackupError> {
        let addr = (params.host.as_str(), params.port)
            .to_socket_addrs()
            .map_err(|e| BackupError::Connection(format!("{}: {}", params.address(), e)))?
            .next()
            .ok_or_else(|| {
                BackupError::Connection(format!("{}: no address resolved", params.address()))
            })?;

        let stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| BackupError::Connection(format!("{}: {}", params.address(), e)))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .and_then(|_| stream.set_write_timeout(Some(self.timeout)))
            .map_err(|e| BackupError::Connection(e.to_string()))?;
        Ok(stream)
    }
}

impl RemoteConnector for SshConnector {
    fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn RemoteSession>, BackupError> {
        let tcp = self.open_tcp(params)?;

        let mut session = Session::new().map_err(|e| BackupError::Connection(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX));
        session
            .handshake()
            .map_err(|e| BackupError::Connection(format!("handshake: {}", e)))?;

        let (key, _) = session
            .host_key()
            .ok_or_else(|| BackupError::Connection("server sent no host key".to_string()))?;
        self.verifier.verify(&params.host, params.port, key)?;

        session
            .userauth_password(&params.user, params.credential.expose())
            .map_err(|e| BackupError::Authentication(e.to_string()))?;
        if !session.authenticated() {
            return Err(BackupError::Authentication(format!(
                "{} was not accepted",
                params.user
            )));
        }

        let sftp = session
            .sftp()
            .map_err(|e| BackupError::Connection(format!("sftp channel: {}", e)))?;
        debug!(host = %params.address(), "SFTP channel open");

        Ok(Box::new(SshSession {
            session,
            sftp: Some(sftp),
            closed: false,
        }))
    }
}

pub struct SshSession {
    session: Session,
    sftp: Option<Sftp>,
    closed: bool,
}

impl SshSession {
    fn sftp(&self) -> Result<&Sftp, BackupError> {
        self.sftp
            .as_ref()
            .ok_or_else(|| BackupError::Connection("session already closed".to_string()))
    }
}

impl RemoteSession for SshSession {
    fn list_dir(&mut self, dir: &str) -> Result<Vec<String>, BackupError> {
        let entries = self
            .sftp()?
            .readdir(Path::new(dir))
            .map_err(|e| BackupError::DirectoryList(format!("{}: {}", dir, e)))?;

        Ok(entries
            .into_iter()
            .filter(|(_, stat)| !stat.is_dir())
            .filter_map(|(path, _)| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .collect())
    }

    fn open(&mut self, path: &str) -> Result<Box<dyn Read + Send>, BackupError> {
        let file = self
            .sftp()?
            .open(Path::new(path))
            .map_err(|e| BackupError::Transfer(format!("{}: {}", path, e)))?;
        Ok(Box::new(file))
    }

    /// Channel first, then the transport.
    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        drop(self.sftp.take());
        if let Err(e) = self.session.disconnect(None, "backup complete", None) {
            warn!(error = %e, "Error while closing SSH session");
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.close();
    }
}
