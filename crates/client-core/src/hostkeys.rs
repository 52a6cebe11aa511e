use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

// Internal Result type alias
type Result<T> = crate::ClientResult<T>;
use dt_types::ssh::HostKeyPolicy;
use russh::{
    Channel,
    client::{Msg, Session},
    keys::{self, HashAlg, PublicKey},
};
use ssh_core::forwarding::ForwardingManager;
use tracing::{info, warn};

/// Applies a [`HostKeyPolicy`] to the key a server presents.
pub struct HostKeyVerifier {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    warned: AtomicBool,
    rejection: Mutex<Option<String>>,
}

impl HostKeyVerifier {
    pub fn new(host: impl Into<String>, port: u16, policy: HostKeyPolicy) -> Self {
        Self {
            host: host.into(),
            port,
            policy,
            warned: AtomicBool::new(false),
            rejection: Mutex::new(None),
        }
    }

    /// Reason recorded by the last failed [`check`](Self::check), if any.
    pub fn take_rejection(&self) -> Option<crate::ClientError> {
        self.rejection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(crate::ClientError::HostKeyFailed)
    }

    fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn check(&self, server_key: &PublicKey) -> Result<bool> {
        let verdict = self.evaluate(server_key);
        if let Err(crate::ClientError::HostKeyFailed(reason)) = &verdict {
            warn!(authority = %self.authority(), %reason, "host key rejected");
            *self.rejection.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.clone());
        }
        verdict
    }

    fn evaluate(&self, server_key: &PublicKey) -> Result<bool> {
        let fingerprint = server_key.fingerprint(HashAlg::Sha256).to_string();
        match &self.policy {
            HostKeyPolicy::InsecureAcceptAny => {
                if !self.warned.swap(true, Ordering::Relaxed) {
                    warn!(
                        authority = %self.authority(),
                        %fingerprint,
                        "accepting host key without verification"
                    );
                }
                Ok(true)
            }
            HostKeyPolicy::KnownHosts { path } => {
                let checked = match path {
                    Some(path) => keys::check_known_hosts_path(&self.host, self.port, server_key, path),
                    None => keys::check_known_hosts(&self.host, self.port, server_key),
                };
                match checked {
                    Ok(true) => {
                        info!(authority = %self.authority(), "host key verified against known_hosts");
                        Ok(true)
                    }
                    Ok(false) => Err(crate::ClientError::HostKeyFailed(format!(
                        "{} is not in known_hosts (presented SHA256 {fingerprint})",
                        self.authority()
                    ))),
                    Err(keys::Error::KeyChanged { line }) => Err(crate::ClientError::HostKeyFailed(format!(
                        "host key for {} changed (known_hosts line {line}, presented {fingerprint})",
                        self.authority()
                    ))),
                    Err(err) => Err(crate::ClientError::HostKeyFailed(format!(
                        "could not check known_hosts for {}: {err}",
                        self.authority()
                    ))),
                }
            }
            HostKeyPolicy::Fingerprint(expected) => {
                if normalize_fingerprint(expected) == normalize_fingerprint(&fingerprint) {
                    info!(authority = %self.authority(), "host key matches pinned fingerprint");
                    Ok(true)
                } else {
                    Err(crate::ClientError::HostKeyFailed(format!(
                        "host key mismatch for {} (pinned {expected} vs received {fingerprint})",
                        self.authority()
                    )))
                }
            }
        }
    }
}

/// Base64 part of a SHA256 fingerprint, without prefix or padding.
fn normalize_fingerprint(value: &str) -> &str {
    let value = value.trim();
    let value = value.strip_prefix("SHA256:").unwrap_or(value);
    value.trim_end_matches('=')
}

#[derive(Clone)]
pub struct ClientHandler {
    verifier: Arc<HostKeyVerifier>,
    forwarding: ForwardingManager,
}

impl ClientHandler {
    pub fn new(verifier: Arc<HostKeyVerifier>, forwarding: ForwardingManager) -> Self {
        Self { verifier, forwarding }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = crate::ClientError;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl std::future::Future<Output = std::result::Result<bool, Self::Error>> + Send {
        let verdict = self.verifier.check(server_public_key);
        async move { verdict }
    }

    fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> impl std::future::Future<Output = std::result::Result<(), Self::Error>> + Send {
        let forwarding = self.forwarding.clone();
        async move {
            if let Err(err) = forwarding
                .handle_remote_forward_channel(channel, connected_address, connected_port, originator_address, originator_port)
                .await
            {
                warn!(error = %err, "remote forwarded connection failed");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::keys::{Algorithm, PrivateKey, ssh_key::rand_core::OsRng};

    fn server_key() -> PublicKey {
        PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap().public_key().clone()
    }

    #[test]
    fn insecure_policy_accepts_anything() {
        let verifier = HostKeyVerifier::new("dev", 22, HostKeyPolicy::InsecureAcceptAny);
        assert!(verifier.check(&server_key()).unwrap());
        assert!(verifier.check(&server_key()).unwrap());
    }

    #[test]
    fn pinned_fingerprint_accepts_with_or_without_prefix() {
        let key = server_key();
        let full = key.fingerprint(HashAlg::Sha256).to_string();
        let bare = full.trim_start_matches("SHA256:").to_string();

        for pinned in [full, bare] {
            let verifier = HostKeyVerifier::new("dev", 22, HostKeyPolicy::Fingerprint(pinned));
            assert!(verifier.check(&key).unwrap());
        }
    }

    #[test]
    fn pinned_fingerprint_rejects_other_keys() {
        let pinned = server_key().fingerprint(HashAlg::Sha256).to_string();
        let verifier = HostKeyVerifier::new("dev", 22, HostKeyPolicy::Fingerprint(pinned));
        let err = verifier.check(&server_key()).unwrap_err();
        assert!(matches!(err, crate::ClientError::HostKeyFailed(_)));
        assert!(matches!(verifier.take_rejection(), Some(crate::ClientError::HostKeyFailed(_))));
        assert!(verifier.take_rejection().is_none());
    }

    #[test]
    fn known_hosts_rejects_unknown_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        std::fs::write(&path, "").unwrap();
        let verifier = HostKeyVerifier::new("dev.internal", 2222, HostKeyPolicy::KnownHosts { path: Some(path) });
        assert!(matches!(
            verifier.check(&server_key()),
            Err(crate::ClientError::HostKeyFailed(_))
        ));
    }

    #[test]
    fn known_hosts_accepts_listed_key() {
        let key = server_key();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        let line = format!("[dev.internal]:2222 {}\n", key.to_openssh().unwrap());
        std::fs::write(&path, line).unwrap();
        let verifier = HostKeyVerifier::new("dev.internal", 2222, HostKeyPolicy::KnownHosts { path: Some(path) });
        assert!(verifier.check(&key).unwrap());
    }
}
