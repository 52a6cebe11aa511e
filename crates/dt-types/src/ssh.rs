//! SSH tunnel configuration types.
//!
//! These structs/enums are intentionally dependency-light so they can be
//! reused by CLI parsing and runtimes without pulling in protocol
//! implementations.

use std::{fmt, path::PathBuf};

/// Address used whenever a forward leaves one of its hosts unset.
pub const LOOPBACK: &str = "127.0.0.1";

/// One port forward.
///
/// For a remote forward the listener lives on the SSH server at
/// `remote_addr:remote_port` and connections are dialed to
/// `local_addr:local_port` on this machine. A local forward is the mirror.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PortForward {
    pub local_addr: String,
    pub local_port: u16,
    pub remote_addr: String,
    pub remote_port: u16,
}

impl PortForward {
    /// Forward between the two ports with both addresses left to loopback.
    pub fn ports(local_port: u16, remote_port: u16) -> Self {
        Self {
            local_port,
            remote_port,
            ..Default::default()
        }
    }

    /// Fill every unset address with [`LOOPBACK`].
    pub fn with_defaults(mut self) -> Self {
        if self.local_addr.trim().is_empty() {
            self.local_addr = LOOPBACK.to_string();
        }
        if self.remote_addr.trim().is_empty() {
            self.remote_addr = LOOPBACK.to_string();
        }
        self
    }

    pub fn local_authority(&self) -> String {
        authority(&self.local_addr, self.local_port)
    }

    pub fn remote_authority(&self) -> String {
        authority(&self.remote_addr, self.remote_port)
    }
}

fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Which side of the connection listens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ForwardDirection {
    /// Listen locally, dial through the SSH connection.
    Local,
    /// Listen on the SSH server, dial on this machine.
    Remote,
}

impl fmt::Display for ForwardDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardDirection::Local => f.write_str("local"),
            ForwardDirection::Remote => f.write_str("remote"),
        }
    }
}

/// What to do when one forward cannot be established.
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ForwardFailurePolicy {
    /// Abort the whole run on the first failing forward.
    #[default]
    AllOrNothing,
    /// Report the failure and keep the remaining forwards alive.
    BestEffort,
}

/// Collection of forwarding directives for one tunnel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ForwardingConfig {
    /// Listen locally, relay through the SSH connection.
    pub local: Vec<PortForward>,
    /// Listen on the server, relay to this machine.
    pub remote: Vec<PortForward>,
    pub policy: ForwardFailurePolicy,
}

impl ForwardingConfig {
    /// Returns true when no forwards are configured.
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.remote.is_empty()
    }
}

/// Result of establishing a single forward.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardOutcome {
    pub direction: ForwardDirection,
    pub forward: PortForward,
    /// Port actually bound by the listening side, or the failure reason.
    pub result: Result<u16, String>,
}

impl ForwardOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

impl fmt::Display for ForwardOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (listen, target) = match self.direction {
            ForwardDirection::Local => (self.forward.local_authority(), self.forward.remote_authority()),
            ForwardDirection::Remote => (self.forward.remote_authority(), self.forward.local_authority()),
        };
        match &self.result {
            Ok(port) => write!(f, "{} {listen} -> {target} (bound {port})", self.direction),
            Err(reason) => write!(f, "{} {listen} -> {target} failed: {reason}", self.direction),
        }
    }
}

/// How the client decides whether to trust the server's host key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Trust any host key. Only meant for throwaway development containers.
    #[default]
    InsecureAcceptAny,
    /// Verify against an OpenSSH `known_hosts` file (`~/.ssh/known_hosts` when `None`).
    KnownHosts { path: Option<PathBuf> },
    /// Accept only the key with this SHA256 fingerprint (`SHA256:` prefix optional).
    Fingerprint(String),
}
