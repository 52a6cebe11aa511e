use ssh_core::SshCoreError;
use thiserror::Error;

/// Errors that can occur in client-core operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// The control connection could not be established
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: Box<ClientError>,
    },

    /// The target address could not be parsed
    #[error("invalid address {0:?}: expected host[:port]")]
    InvalidAddress(String),

    /// SSH error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Forwarding or session plumbing failed
    #[error(transparent)]
    Forwarding(#[from] SshCoreError),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Host key verification failed
    #[error("host key verification failed: {0}")]
    HostKeyFailed(String),

    /// Cryptographic error
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// The remote command exited with a non-zero status
    #[error("remote command exited with status {status}")]
    CommandFailed { status: u32 },

    /// The remote command was killed by a signal
    #[error("remote command killed by signal {signal}")]
    CommandSignaled { signal: String, message: String },

    /// The session channel closed before reporting how the command ended
    #[error("remote command ended without an exit status")]
    CommandExitMissing,

    /// The server closed the session while the tunnel was idle
    #[error("SSH session closed by the server")]
    Disconnected,
}

/// Result type alias for client-core operations
pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    pub fn connect(address: impl Into<String>, source: ClientError) -> Self {
        Self::Connect {
            address: address.into(),
            source: Box::new(source),
        }
    }

    /// Innermost cause for `Connect` errors, `self` otherwise.
    pub fn root(&self) -> &ClientError {
        match self {
            ClientError::Connect { source, .. } => source.root(),
            other => other,
        }
    }
}
