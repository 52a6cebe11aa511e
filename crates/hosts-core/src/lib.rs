//! Hosts-file editing for development sessions.
//!
//! A [`HostsSection`] owns one named block of the hosts file, delimited by
//! sentinel comment lines. Flushing reconciles the block with the in-memory
//! mappings and never touches content outside of it. Persistence goes through
//! [`ScopedFile`], which serializes access to a path within the process.

mod entry;
pub mod error;
mod scoped_file;
mod section;

pub use entry::parse_host_entry;
pub use error::{HostsError, HostsResult};
pub use scoped_file::ScopedFile;
pub use section::{HOSTS_PATH_ENV, HostsSection, LineEnding, SectionGuard, default_hosts_path};
