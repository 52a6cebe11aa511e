//! SSH tunnel client.
//!
//! [`TunnelClient`] owns one SSH control connection. It optionally runs a
//! remote command, opens the configured remote and local port forwards and
//! keeps them alive until the command ends or the caller cancels the run.

mod auth;
pub mod error;
mod hostkeys;

use std::{path::PathBuf, sync::Arc, time::Duration};

use auth::{AuthMethod, authenticate};
use dt_types::ssh::{ForwardFailurePolicy, ForwardOutcome, ForwardingConfig, HostKeyPolicy, PortForward};
pub use error::{ClientError, ClientResult};
pub use hostkeys::{ClientHandler, HostKeyVerifier};
use russh::{Channel, Preferred, client};
use secrecy::SecretString;
use ssh_core::{
    crypto::default_preferred,
    forwarding::ForwardingManager,
    session::{self, CommandExit, CommandIo, SessionHandle, SharedSessionHandle, run_command},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_USERNAME: &str = "root";
const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// One SSH connection plus the command and forwards that ride on it.
pub struct TunnelClient {
    address: String,
    username: String,
    auth: Vec<AuthMethod>,
    command: Option<String>,
    io: CommandIo,
    forwarding: ForwardingConfig,
    host_key_policy: HostKeyPolicy,
    keepalive_interval: Duration,
    preferred: Preferred,
    outcomes: watch::Sender<Vec<ForwardOutcome>>,
}

impl TunnelClient {
    /// Client for `host[:port]` (`[v6]:port` for IPv6), logging in as `root`.
    pub fn new(address: impl Into<String>) -> Self {
        let (outcomes, _) = watch::channel(Vec::new());
        Self {
            address: address.into(),
            username: DEFAULT_USERNAME.to_string(),
            auth: Vec::new(),
            command: None,
            io: CommandIo::default(),
            forwarding: ForwardingConfig::default(),
            host_key_policy: HostKeyPolicy::default(),
            keepalive_interval: DEFAULT_KEEPALIVE,
            preferred: default_preferred(),
            outcomes,
        }
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Try password authentication (after any methods added earlier).
    pub fn password(mut self, password: impl Into<String>) -> Self {
        let password: String = password.into();
        self.auth.push(AuthMethod::Password(SecretString::new(password.into_boxed_str())));
        self
    }

    /// Try public-key authentication with an unencrypted private key file.
    pub fn identity(mut self, path: impl Into<PathBuf>) -> Self {
        self.auth.push(AuthMethod::Identity {
            path: path.into(),
            passphrase: None,
        });
        self
    }

    /// Try public-key authentication with a passphrase-protected private key file.
    pub fn identity_with_passphrase(mut self, path: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        let passphrase: String = passphrase.into();
        self.auth.push(AuthMethod::Identity {
            path: path.into(),
            passphrase: Some(SecretString::new(passphrase.into_boxed_str())),
        });
        self
    }

    pub fn stdin<R>(mut self, stdin: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.io.stdin = Some(Box::new(stdin));
        self
    }

    pub fn stdout<W>(mut self, stdout: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.io.stdout = Some(Box::new(stdout));
        self
    }

    pub fn stderr<W>(mut self, stderr: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.io.stderr = Some(Box::new(stderr));
        self
    }

    /// Command to run once connected. Empty means tunnel-only mode.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        let command = command.into();
        self.command = (!command.trim().is_empty()).then_some(command);
        self
    }

    /// Listen locally and relay through the server. Unset addresses become loopback.
    pub fn local_forward(mut self, forward: PortForward) -> Self {
        self.forwarding.local.push(forward.with_defaults());
        self
    }

    /// Listen on the server and relay to this machine. Unset addresses become loopback.
    pub fn remote_forward(mut self, forward: PortForward) -> Self {
        self.forwarding.remote.push(forward.with_defaults());
        self
    }

    pub fn host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn forward_policy(mut self, policy: ForwardFailurePolicy) -> Self {
        self.forwarding.policy = policy;
        self
    }

    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Override the negotiated algorithm preferences.
    pub fn preferred_algorithms(mut self, preferred: Preferred) -> Self {
        self.preferred = preferred;
        self
    }

    /// Per-forward results, published once every forward has been attempted.
    pub fn subscribe_forwards(&self) -> watch::Receiver<Vec<ForwardOutcome>> {
        self.outcomes.subscribe()
    }

    /// Connect, set up forwards and run until the command ends or `cancel` fires.
    ///
    /// Forwards are torn down and the connection closed on every return path.
    pub async fn run(self, cancel: CancellationToken) -> ClientResult<()> {
        let TunnelClient {
            address,
            username,
            auth,
            command,
            io,
            forwarding,
            host_key_policy,
            keepalive_interval,
            preferred,
            outcomes,
        } = self;

        let (host, port) = split_authority(&address)?;
        let config = Arc::new(client::Config {
            preferred,
            nodelay: true,
            inactivity_timeout: None,
            keepalive_interval: Some(keepalive_interval),
            keepalive_max: 3,
            ..Default::default()
        });
        let forwarding = ForwardingManager::new(forwarding);
        if forwarding.has_requests() {
            let summary = forwarding.descriptors();
            info!(targets = %summary.join(", "), "forwarding directives requested");
        }
        let verifier = Arc::new(HostKeyVerifier::new(host.clone(), port, host_key_policy));
        let handler = ClientHandler::new(verifier.clone(), forwarding.clone());

        info!(target = %address, user = %username, "connecting");
        let mut session = client::connect(config, (host.as_str(), port), handler)
            .await
            .map_err(|err| ClientError::connect(&address, verifier.take_rejection().unwrap_or(err)))?;

        let established = establish(&mut session, &username, &auth, &forwarding)
            .await
            .map_err(|err| match verifier.take_rejection() {
                Some(rejected) => ClientError::connect(&address, rejected),
                None => err,
            });
        let session = Arc::new(session);
        let (channel, result) = match established {
            Ok((mut channel, remote_outcomes)) => {
                let result = serve(
                    &session,
                    &mut channel,
                    &forwarding,
                    remote_outcomes,
                    command,
                    io,
                    &cancel,
                    &outcomes,
                )
                .await;
                (Some(channel), result)
            }
            Err(err) => (None, Err(err)),
        };

        teardown(session, &forwarding, channel).await;
        result
    }
}

/// Authenticate, open the session channel and register remote forwards.
async fn establish(
    session: &mut SessionHandle<ClientHandler>,
    username: &str,
    auth: &[AuthMethod],
    forwarding: &ForwardingManager,
) -> ClientResult<(Channel<client::Msg>, Vec<ForwardOutcome>)> {
    authenticate(session, username, auth).await?;
    let channel = session.channel_open_session().await?;
    match forwarding.start_remote_forwards(session).await {
        Ok(outcomes) => Ok((channel, outcomes)),
        Err(err) => {
            let _ = channel.close().await;
            Err(err.into())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn serve(
    session: &SharedSessionHandle<ClientHandler>,
    channel: &mut Channel<client::Msg>,
    forwarding: &ForwardingManager,
    mut outcomes: Vec<ForwardOutcome>,
    command: Option<String>,
    io: CommandIo,
    cancel: &CancellationToken,
    report: &watch::Sender<Vec<ForwardOutcome>>,
) -> ClientResult<()> {
    outcomes.extend(forwarding.start_local_forwards(session.clone()).await?);
    for outcome in &outcomes {
        if outcome.is_ok() {
            info!(forward = %outcome, "forward established");
        } else {
            warn!(forward = %outcome, "forward unavailable");
        }
    }
    report.send_replace(outcomes);

    match command {
        Some(command) => match run_command(channel, &command, io).await? {
            CommandExit::Status(0) => Ok(()),
            CommandExit::Status(status) => Err(ClientError::CommandFailed { status }),
            CommandExit::Signal { name, message, .. } => Err(ClientError::CommandSignaled { signal: name, message }),
            CommandExit::Missing => Err(ClientError::CommandExitMissing),
        },
        None => {
            info!("tunnel established; waiting for cancellation");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("cancellation requested; closing tunnel");
                        return Ok(());
                    }
                    msg = channel.wait() => match msg {
                        None | Some(russh::ChannelMsg::Close) => return Err(ClientError::Disconnected),
                        Some(other) => debug!(?other, "ignoring session channel message"),
                    },
                }
            }
        }
    }
}

async fn teardown(
    session: SharedSessionHandle<ClientHandler>,
    forwarding: &ForwardingManager,
    channel: Option<Channel<client::Msg>>,
) {
    forwarding.shutdown(Some(session.clone())).await;
    if let Some(channel) = channel {
        let _ = channel.close().await;
    }
    session::disconnect(&session).await;
    match Arc::try_unwrap(session) {
        Ok(handle) => {
            if let Err(err) = handle.await {
                warn!(error = %err, "SSH session shutdown error");
            }
        }
        Err(_) => debug!("SSH session handle still in use; skipping shutdown wait"),
    }
}

/// Split `host[:port]`, `[v6]` or `[v6]:port`; a bare IPv6 address keeps port 22.
fn split_authority(address: &str) -> ClientResult<(String, u16)> {
    let invalid = || ClientError::InvalidAddress(address.to_string());
    let address = address.trim();
    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        let port = match tail {
            "" => DEFAULT_SSH_PORT,
            _ => tail
                .strip_prefix(':')
                .and_then(|port| port.parse().ok())
                .ok_or_else(invalid)?,
        };
        if host.is_empty() {
            return Err(invalid());
        }
        return Ok((host.to_string(), port));
    }
    match address.split_once(':') {
        Some((host, port)) if !port.contains(':') => {
            let port = port.parse().map_err(|_| invalid())?;
            if host.is_empty() {
                return Err(invalid());
            }
            Ok((host.to_string(), port))
        }
        Some(_) => Ok((address.to_string(), DEFAULT_SSH_PORT)),
        None if address.is_empty() => Err(invalid()),
        None => Ok((address.to_string(), DEFAULT_SSH_PORT)),
    }
}
