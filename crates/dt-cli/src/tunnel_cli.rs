use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args};
use client_core::TunnelClient;
use dt_types::ssh::{ForwardFailurePolicy, ForwardingConfig, HostKeyPolicy};
use hosts_core::{HostsSection, parse_host_entry};
use secrecy::{ExposeSecret, SecretString};
use ssh_core::{
    crypto::strict_preferred,
    forwarding::{parse_local_forward, parse_remote_forward},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Args)]
pub struct TunnelArgs {
    /// Target as host[:port] or [ipv6]:port
    #[arg(value_name = "ADDRESS")]
    address: String,
    /// Remote command to run; without one the tunnel stays up until Ctrl-C
    #[arg(value_name = "COMMAND", trailing_var_arg = true)]
    command: Vec<String>,
    /// Remote username
    #[arg(short = 'l', long = "username", value_name = "USER", env = "DEVTUNNEL_USER", default_value = "root")]
    username: String,
    /// Password for password authentication
    #[arg(long = "password", value_name = "PASSWORD", env = "DEVTUNNEL_PASSWORD", hide_env_values = true, help_heading = "Auth Options")]
    password: Option<String>,
    /// Private key for public-key authentication (repeatable)
    #[arg(short = 'i', long = "identity", value_name = "KEY", action = ArgAction::Append, help_heading = "Auth Options")]
    identities: Vec<PathBuf>,
    /// Passphrase for encrypted --identity keys
    #[arg(long = "identity-passphrase", value_name = "PASSPHRASE", env = "DEVTUNNEL_IDENTITY_PASSPHRASE", hide_env_values = true, help_heading = "Auth Options")]
    identity_passphrase: Option<String>,
    /// Verify the server key against known_hosts (default ~/.ssh/known_hosts)
    #[arg(long = "known-hosts", value_name = "PATH", num_args = 0..=1, require_equals = true, help_heading = "Auth Options")]
    known_hosts: Option<Option<PathBuf>>,
    /// Require the server key to match this SHA256 fingerprint
    #[arg(long, value_name = "SHA256", conflicts_with = "known_hosts", help_heading = "Auth Options")]
    fingerprint: Option<String>,
    /// Local forward [bind:]port:host:hostport (repeatable)
    #[arg(short = 'L', value_name = "SPEC", action = ArgAction::Append, help_heading = "Forwarding")]
    local: Vec<String>,
    /// Remote forward [bind:]port:host:hostport (repeatable)
    #[arg(short = 'R', value_name = "SPEC", action = ArgAction::Append, help_heading = "Forwarding")]
    remote: Vec<String>,
    /// What to do when a forward cannot be opened
    #[arg(long = "forward-policy", value_enum, value_name = "POLICY", help_heading = "Forwarding")]
    forward_policy: Option<ForwardFailurePolicy>,
    /// Keep running when some forwards fail (same as --forward-policy best-effort)
    #[arg(long = "best-effort", action = ArgAction::SetTrue, conflicts_with = "forward_policy", help_heading = "Forwarding")]
    best_effort: bool,
    /// Only negotiate curve25519 key exchange and AEAD ciphers
    #[arg(long = "strict-crypto", action = ArgAction::SetTrue)]
    strict_crypto: bool,
    /// Send keepalive requests every N seconds (default 30)
    #[arg(long = "keepalive-interval", value_name = "SECONDS")]
    keepalive_interval: Option<u64>,
    /// Hosts-file section to publish while the tunnel runs
    #[arg(long = "hosts-section", value_name = "NAME", help_heading = "Hosts")]
    hosts_section: Option<String>,
    /// Mapping for --hosts-section as IP=NAME[,NAME] (repeatable)
    #[arg(long = "host", value_name = "IP=NAMES", action = ArgAction::Append, requires = "hosts_section", help_heading = "Hosts")]
    hosts: Vec<String>,
    /// Hosts file to edit instead of the system one
    #[arg(long = "hosts-file", value_name = "PATH", requires = "hosts_section", help_heading = "Hosts")]
    hosts_file: Option<PathBuf>,
}

/// Validated tunnel settings.
#[derive(Debug)]
pub struct TunnelConfig {
    pub address: String,
    pub username: String,
    pub password: Option<SecretString>,
    pub identities: Vec<PathBuf>,
    pub identity_passphrase: Option<SecretString>,
    pub command: Option<String>,
    pub forwarding: ForwardingConfig,
    pub host_key_policy: HostKeyPolicy,
    pub strict_crypto: bool,
    pub keepalive_interval: Option<Duration>,
    pub hosts: Option<HostsConfig>,
}

#[derive(Debug)]
pub struct HostsConfig {
    pub section: String,
    pub path: Option<PathBuf>,
    pub entries: Vec<(String, Vec<String>)>,
}

impl TryFrom<TunnelArgs> for TunnelConfig {
    type Error = anyhow::Error;

    fn try_from(args: TunnelArgs) -> Result<Self> {
        let TunnelArgs {
            address,
            command,
            username,
            password,
            identities,
            identity_passphrase,
            known_hosts,
            fingerprint,
            local,
            remote,
            forward_policy,
            best_effort,
            strict_crypto,
            keepalive_interval,
            hosts_section,
            hosts,
            hosts_file,
        } = args;

        if username.trim().is_empty() {
            bail!("--username must not be empty");
        }

        let mut forwarding = ForwardingConfig {
            policy: if best_effort {
                ForwardFailurePolicy::BestEffort
            } else {
                forward_policy.unwrap_or_default()
            },
            ..Default::default()
        };
        for spec in &local {
            forwarding.local.push(parse_local_forward(spec).with_context(|| format!("-L {spec}"))?);
        }
        for spec in &remote {
            forwarding.remote.push(parse_remote_forward(spec).with_context(|| format!("-R {spec}"))?);
        }

        let host_key_policy = match (known_hosts, fingerprint) {
            (Some(path), _) => HostKeyPolicy::KnownHosts { path },
            (None, Some(fingerprint)) => HostKeyPolicy::Fingerprint(fingerprint),
            (None, None) => HostKeyPolicy::InsecureAcceptAny,
        };

        let keepalive_interval = match keepalive_interval {
            Some(0) => bail!("--keepalive-interval must be greater than zero"),
            other => other.map(Duration::from_secs),
        };

        let hosts = match hosts_section {
            Some(section) => {
                let entries = hosts
                    .iter()
                    .map(|entry| parse_host_entry(entry).with_context(|| format!("--host {entry}")))
                    .collect::<Result<Vec<_>>>()?;
                Some(HostsConfig {
                    section,
                    path: hosts_file,
                    entries,
                })
            }
            None => None,
        };

        let command = if command.is_empty() { None } else { Some(command.join(" ")) };

        Ok(TunnelConfig {
            address,
            username,
            password: password.map(|value| SecretString::new(value.into_boxed_str())),
            identities,
            identity_passphrase: identity_passphrase.map(|value| SecretString::new(value.into_boxed_str())),
            command,
            forwarding,
            host_key_policy,
            strict_crypto,
            keepalive_interval,
            hosts,
        })
    }
}

impl TunnelConfig {
    pub fn into_client(self) -> TunnelClient {
        let mut client = TunnelClient::new(self.address)
            .username(self.username)
            .host_key_policy(self.host_key_policy)
            .forward_policy(self.forwarding.policy);
        if let Some(password) = &self.password {
            client = client.password(password.expose_secret());
        }
        for identity in self.identities {
            client = match &self.identity_passphrase {
                Some(passphrase) => client.identity_with_passphrase(identity, passphrase.expose_secret()),
                None => client.identity(identity),
            };
        }
        for forward in self.forwarding.remote {
            client = client.remote_forward(forward);
        }
        for forward in self.forwarding.local {
            client = client.local_forward(forward);
        }
        if let Some(command) = self.command {
            client = client
                .command(command)
                .stdin(crate::stdin::stdin())
                .stdout(tokio::io::stdout())
                .stderr(tokio::io::stderr());
        }
        if self.strict_crypto {
            client = client.preferred_algorithms(strict_preferred());
        }
        if let Some(interval) = self.keepalive_interval {
            client = client.keepalive_interval(interval);
        }
        client
    }
}

impl HostsConfig {
    pub fn build(&self) -> Result<HostsSection> {
        let mut section = match &self.path {
            Some(path) => HostsSection::with_path(&self.section, path)?,
            None => HostsSection::new(&self.section)?,
        };
        for (address, names) in &self.entries {
            section.add(address, names)?;
        }
        Ok(section)
    }
}

/// Publish the hosts section, run the tunnel and remove the section again.
pub async fn run_tunnel(mut config: TunnelConfig, cancel: CancellationToken) -> Result<()> {
    let guard = match config.hosts.take() {
        Some(hosts) => {
            let guard = hosts.build()?.into_guard()?;
            info!(section = %hosts.section, entries = hosts.entries.len(), "hosts section published");
            Some(guard)
        }
        None => None,
    };

    let result = config.into_client().run(cancel).await;

    if let Some(guard) = guard
        && let Err(err) = guard.release()
    {
        warn!(error = %err, "failed to remove hosts section");
    }
    result.map_err(Into::into)
}
