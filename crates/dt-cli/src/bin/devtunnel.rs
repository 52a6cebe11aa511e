use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use client_core::ClientError;
use dt_cli::{
    Cli, Command, hosts_cli::run_hosts, init_tracing,
    tunnel_cli::{TunnelConfig, run_tunnel},
};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(ClientError::CommandFailed { status }) = err.downcast_ref::<ClientError>() {
                return ExitCode::from(u8::try_from(*status).unwrap_or(u8::MAX));
            }
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Tunnel(args) => {
            let config = TunnelConfig::try_from(args)?;
            let cancel = CancellationToken::new();
            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received; shutting down");
                    interrupt.cancel();
                }
            });
            run_tunnel(config, cancel).await
        }
        Command::Hosts(args) => run_hosts(&args, &mut std::io::stdout()),
    }
}
