//! SSH port forwarding.
//!
//! This module provides functionality for:
//! - Remote TCP forwarding (listen on the server, dial on this machine)
//! - Local TCP forwarding (listen here, dial through `direct-tcpip`)
//! - The bidirectional relay shared by both directions
//! - Parsing of `[bind:]port:host:hostport` forward specs
//!
//! The main entry point is [`ForwardingManager`], which coordinates all
//! forwarding activities for an SSH session.

mod local;
mod manager;
mod parsing;
mod relay;
mod remote;
mod traits;

// Re-export public API
pub use manager::ForwardingManager;
pub use parsing::{parse_local_forward, parse_remote_forward};
pub use relay::tunnel;
pub use remote::{IncomingConnection, RemoteListener};
pub use traits::{ForwardSession, ForwardStream, ForwardStreamIo, RemoteForwardChannel, RemoteRegistrar};
