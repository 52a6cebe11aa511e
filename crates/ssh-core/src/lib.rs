//! SSH plumbing for the tunnel client: port forwarding, byte relaying and
//! remote command execution on top of russh.

pub mod crypto;
pub mod error;
pub mod forwarding;
pub mod session;

pub use error::{SshCoreError, SshResult};
