//! Host identity policies for the SSH adapter.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::core::error::BackupError;
use crate::core::remote::HostKeyVerifier;

pub fn fingerprint(key: &[u8]) -> String {
    blake3::hash(key).to_hex().to_string()
}

/// Accept and remember a host's key the first time it is seen, then insist
/// on that key afterwards. This is a convenience default, not a security
/// guarantee: the very first connection is trusted blindly.
pub struct TrustOnFirstUse {
    path: PathBuf,
    known: Mutex<BTreeMap<String, String>>,
}

impl TrustOnFirstUse {
    pub fn load(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let known = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e),
        };
        Ok(Self {
            path,
            known: Mutex::new(known),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, known: &BTreeMap<String, String>) -> io::Result<()> {
        let content = serde_json::to_string_pretty(known)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, content)
    }
}

impl HostKeyVerifier for TrustOnFirstUse {
    fn verify(&self, host: &str, port: u16, key: &[u8]) -> Result<(), BackupError> {
        let id = format!("{}:{}", host, port);
        let presented = fingerprint(key);
        let mut known = self.known.lock().unwrap_or_else(|e| e.into_inner());

        match known.get(&id) {
            Some(recorded) if *recorded == presented => Ok(()),
            Some(_) => Err(BackupError::HostKeyMismatch { host: id }),
            None => {
                known.insert(id.clone(), presented.clone());
                if let Err(e) = self.save(&known) {
                    warn!(error = %e, path = %self.path.display(), "Failed to persist host key");
                }
                info!(host = %id, fingerprint = %presented, "Trusting new host key");
                Ok(())
            }
        }
    }
}

/// Only accept a key with this exact fingerprint.
pub struct PinnedFingerprint {
    expected: String,
}

impl PinnedFingerprint {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into().trim().to_ascii_lowercase(),
        }
    }
}

impl HostKeyVerifier for PinnedFingerprint {
    fn verify(&self, host: &str, port: u16, key: &[u8]) -> Result<(), BackupError> {
        if fingerprint(key) == self.expected {
            Ok(())
        } else {
            Err(BackupError::HostKeyMismatch {
                host: format!("{}:{}", host, port),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_key_is_trusted_and_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("known_hosts.json");

        let verifier = TrustOnFirstUse::load(&path).unwrap();
        verifier.verify("10.0.0.1", 22, b"key-a").unwrap();
        verifier.verify("10.0.0.1", 22, b"key-a").unwrap();

        let reloaded = TrustOnFirstUse::load(&path).unwrap();
        reloaded.verify("10.0.0.1", 22, b"key-a").unwrap();
        assert!(matches!(
            reloaded.verify("10.0.0.1", 22, b"key-b"),
            Err(BackupError::HostKeyMismatch { host }) if host == "10.0.0.1:22"
        ));
    }

    #[test]
    fn ports_are_tracked_separately() {
        let dir = tempdir().unwrap();
        let verifier = TrustOnFirstUse::load(dir.path().join("k.json")).unwrap();
        verifier.verify("console", 22, b"key-a").unwrap();
        verifier.verify("console", 2222, b"key-b").unwrap();
    }

    #[test]
    fn pinned_fingerprint_is_strict() {
        let pinned = PinnedFingerprint::new(fingerprint(b"key-a").to_uppercase());
        pinned.verify("console", 22, b"key-a").unwrap();
        assert!(pinned.verify("console", 22, b"key-b").is_err());
    }
}
