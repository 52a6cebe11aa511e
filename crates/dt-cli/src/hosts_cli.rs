use std::{io::Write, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use hosts_core::{HostsSection, parse_host_entry};
use tracing::info;

#[derive(Debug, Args)]
pub struct HostsArgs {
    /// Hosts file to edit (defaults to $HOSTS_PATH or the system hosts file)
    #[arg(long = "hosts-file", value_name = "PATH", global = true)]
    pub hosts_file: Option<PathBuf>,
    #[command(subcommand)]
    pub action: HostsAction,
}

#[derive(Debug, Subcommand)]
pub enum HostsAction {
    /// Replace the section with the given mappings
    Set {
        #[arg(value_name = "SECTION")]
        section: String,
        /// Mappings as IP=NAME[,NAME]
        #[arg(value_name = "IP=NAMES", required = true)]
        entries: Vec<String>,
    },
    /// Remove the section
    Remove {
        #[arg(value_name = "SECTION")]
        section: String,
    },
    /// Print the mappings currently stored in the section
    Show {
        #[arg(value_name = "SECTION")]
        section: String,
    },
}

impl HostsArgs {
    fn open(&self, section: &str) -> Result<HostsSection> {
        let section = match &self.hosts_file {
            Some(path) => HostsSection::with_path(section, path)?,
            None => HostsSection::new(section)?,
        };
        Ok(section)
    }

    fn load(&self, section: &str) -> Result<HostsSection> {
        let section = match &self.hosts_file {
            Some(path) => HostsSection::load_from(section, path)?,
            None => HostsSection::load(section)?,
        };
        Ok(section)
    }
}

/// Apply a `hosts` subcommand; `show` output goes to `out`.
pub fn run_hosts(args: &HostsArgs, out: &mut impl Write) -> Result<()> {
    match &args.action {
        HostsAction::Set { section, entries } => {
            let mut hosts = args.open(section)?;
            for entry in entries {
                let (address, names) = parse_host_entry(entry).with_context(|| format!("hosts entry {entry}"))?;
                hosts.add(&address, &names)?;
            }
            hosts
                .flush()
                .with_context(|| format!("failed to write {}", hosts.path().display()))?;
            info!(section = %section, path = %hosts.path().display(), "hosts section updated");
        }
        HostsAction::Remove { section } => {
            let hosts = args.open(section)?;
            hosts
                .flush()
                .with_context(|| format!("failed to write {}", hosts.path().display()))?;
            info!(section = %section, path = %hosts.path().display(), "hosts section removed");
        }
        HostsAction::Show { section } => {
            let hosts = args.load(section)?;
            for (address, hostname) in hosts.entries() {
                writeln!(out, "{address} {hostname}")?;
            }
        }
    }
    Ok(())
}
