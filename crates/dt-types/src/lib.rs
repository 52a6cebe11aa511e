//! Shared type definitions for devtunnel.
//!
//! This crate only holds plain configuration and reporting types so it can be
//! used by the CLI, the forwarding engine, and launchers without pulling in the
//! SSH stack.

pub mod ssh;
