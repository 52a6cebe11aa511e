use clap::{Parser, Subcommand};

pub mod hosts_cli;
pub mod stdin;
pub mod tunnel_cli;

#[derive(Debug, Parser)]
#[command(name = "devtunnel", about = "SSH tunnels and hosts-file sections for development environments")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to a host, forward ports and optionally run a command
    Tunnel(tunnel_cli::TunnelArgs),
    /// Edit a managed section of the hosts file
    Hosts(hosts_cli::HostsArgs),
}

pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}
