use thiserror::Error;

/// Errors that can occur while editing the hosts file
#[derive(Error, Debug)]
pub enum HostsError {
    /// I/O error reading or writing the hosts file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Section name cannot be turned into sentinel lines
    #[error("invalid section name {0:?}: must be non-empty and single-line")]
    InvalidSectionName(String),

    /// Address is not an IPv4 or IPv6 literal
    #[error("invalid address {0:?}: expected an IPv4 or IPv6 literal")]
    InvalidAddress(String),

    /// Hostname is empty or contains whitespace
    #[error("invalid hostname {0:?}")]
    InvalidHostname(String),

    /// Mapping is not written as `address=name[,name]`
    #[error("invalid hosts entry {0:?}: expected address=name[,name]")]
    InvalidEntry(String),
}

/// Result type alias for hosts-file operations
pub type HostsResult<T> = Result<T, HostsError>;
