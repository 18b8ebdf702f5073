pub mod host_key;
mod simulated;
mod ssh;

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::AppConfig;
use crate::core::remote::{HostKeyVerifier, RemoteConnector};

pub use host_key::{PinnedFingerprint, TrustOnFirstUse, fingerprint};
pub use simulated::{SimulatedFailure, SimulatedRemote};
pub use ssh::{SshConnector, SshSession};

/// Pick the host-identity policy from the configuration.
pub fn get_verifier(config: &AppConfig) -> std::io::Result<Arc<dyn HostKeyVerifier>> {
    match config.host_key_fingerprint.as_deref().filter(|f| !f.is_empty()) {
        Some(pinned) => Ok(Arc::new(PinnedFingerprint::new(pinned))),
        None => Ok(Arc::new(TrustOnFirstUse::load(&config.known_hosts_file)?)),
    }
}

/// The real SSH connector, or a simulated console driven from stdin.
pub fn get_connector(config: &AppConfig) -> std::io::Result<Arc<dyn RemoteConnector>> {
    if config.simulation {
        let remote = SimulatedRemote::new();
        spawn_simulator_console(remote.clone());
        return Ok(Arc::new(remote));
    }

    let verifier = get_verifier(config)?;
    Ok(Arc::new(SshConnector::new(
        verifier,
        Duration::from_secs(config.connect_timeout_secs),
    )))
}

fn spawn_simulator_console(remote: SimulatedRemote) {
    info!("(Simulator) Commands: 'add <name>', 'rm <name>', 'fail <connect|auth|list|transfer>', 'ok', 'ls'");

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(cmd) = line else {
                break;
            };
            let parts: Vec<&str> = cmd.split_whitespace().collect();
            match (parts.first().copied(), parts.get(1).copied()) {
                (Some("add"), Some(name)) => remote.add_file(name, format!("simulated backup {}", name)),
                (Some("rm"), Some(name)) => remote.remove_file(name),
                (Some("fail"), Some(kind)) => match SimulatedFailure::parse(kind) {
                    Some(failure) => remote.set_failure(Some(failure)),
                    None => info!(kind, "(Simulator) Unknown failure kind"),
                },
                (Some("ok"), _) => remote.set_failure(None),
                (Some("ls"), _) => info!(files = ?remote.files(), "(Simulator) Remote files"),
                _ => info!("(Simulator) Use: 'add <name>', 'rm <name>', 'fail <kind>', 'ok', 'ls'"),
            }
        }
    });
}
