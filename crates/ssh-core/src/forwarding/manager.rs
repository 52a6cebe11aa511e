use super::{
    local::{bind_local_forward, run_local_accept_loop},
    remote::{RemoteRegistration, dispatch_remote_channel, register_remote_forward, run_remote_accept_loop},
    traits::{ForwardSession, RemoteForwardChannel, RemoteRegistrar},
};
use crate::SshCoreError;
use dt_types::ssh::{ForwardDirection, ForwardFailurePolicy, ForwardOutcome, ForwardingConfig, PortForward};
use std::{future::Future, sync::Arc};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, warn};

type Result<T> = crate::SshResult<T>;

#[derive(Default)]
struct ForwardingState {
    config: ForwardingConfig,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    remote_bindings: Mutex<Vec<RemoteRegistration>>,
}

/// Manages the remote and local port forwards of one SSH session.
#[derive(Clone, Default)]
pub struct ForwardingManager {
    state: Arc<ForwardingState>,
}

impl ForwardingManager {
    /// Create a new forwarding manager with the given configuration.
    pub fn new(config: ForwardingConfig) -> Self {
        Self {
            state: Arc::new(ForwardingState {
                config,
                tasks: Mutex::new(Vec::new()),
                remote_bindings: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Check if there are any forwarding requests configured.
    pub fn has_requests(&self) -> bool {
        !self.state.config.is_empty()
    }

    /// Get human-readable descriptors of all configured forwards.
    pub fn descriptors(&self) -> Vec<String> {
        let config = &self.state.config;
        let local = config
            .local
            .iter()
            .map(|fwd| format!("local {} -> {}", fwd.local_authority(), fwd.remote_authority()));
        let remote = config
            .remote
            .iter()
            .map(|fwd| format!("remote {} -> {}", fwd.remote_authority(), fwd.local_authority()));
        remote.chain(local).collect()
    }

    /// `(bind address, bound port)` of every live remote listener.
    pub async fn remote_bindings(&self) -> Vec<(String, u32)> {
        self.state
            .remote_bindings
            .lock()
            .await
            .iter()
            .map(|entry| (entry.bind_address.clone(), entry.actual_port))
            .collect()
    }

    /// Open every configured remote listener and start its accept loop.
    ///
    /// Under [`ForwardFailurePolicy::AllOrNothing`] the first failure is
    /// returned; listeners opened before it stay registered until
    /// [`shutdown`](Self::shutdown).
    pub async fn start_remote_forwards<R>(&self, session: &mut R) -> Result<Vec<ForwardOutcome>>
    where
        R: RemoteRegistrar + Send,
    {
        let mut outcomes = Vec::with_capacity(self.state.config.remote.len());
        for spec in &self.state.config.remote {
            match register_remote_forward(spec, session, &self.state.remote_bindings).await {
                Ok((actual_port, listener)) => {
                    let target = spec.clone();
                    self.spawn_task(async move {
                        match run_remote_accept_loop(listener, target).await {
                            Err(SshCoreError::ListenerClosed { address }) => {
                                debug!(bind = %address, "remote accept loop stopped");
                            }
                            Err(err) => warn!(error = %err, "remote accept loop failed"),
                            Ok(()) => {}
                        }
                    })
                    .await;
                    let bound = u16::try_from(actual_port).unwrap_or(spec.remote_port);
                    outcomes.push(ForwardOutcome {
                        direction: ForwardDirection::Remote,
                        forward: spec.clone(),
                        result: Ok(bound),
                    });
                }
                Err(err) => outcomes.push(self.on_failure(ForwardDirection::Remote, spec, err)?),
            }
        }
        Ok(outcomes)
    }

    /// Bind every configured local listener and start its accept loop.
    pub async fn start_local_forwards<S>(&self, session: S) -> Result<Vec<ForwardOutcome>>
    where
        S: ForwardSession,
    {
        let mut outcomes = Vec::with_capacity(self.state.config.local.len());
        for spec in &self.state.config.local {
            match bind_local_forward(spec).await {
                Ok((listener, port)) => {
                    let spec_for_loop = spec.clone();
                    let session = session.clone();
                    self.spawn_task(async move {
                        if let Err(err) = run_local_accept_loop(listener, spec_for_loop, session).await {
                            warn!(error = %err, "local accept loop failed");
                        }
                    })
                    .await;
                    outcomes.push(ForwardOutcome {
                        direction: ForwardDirection::Local,
                        forward: spec.clone(),
                        result: Ok(port),
                    });
                }
                Err(err) => outcomes.push(self.on_failure(ForwardDirection::Local, spec, err)?),
            }
        }
        Ok(outcomes)
    }

    /// Route a `forwarded-tcpip` channel opened by the server to its listener.
    ///
    /// Returns without waiting for the connection to be relayed.
    pub async fn handle_remote_forward_channel<C>(
        &self,
        channel: C,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
    ) -> Result<()>
    where
        C: RemoteForwardChannel,
    {
        let origin = format!("{originator_address}:{originator_port}");
        dispatch_remote_channel(
            channel,
            connected_address,
            connected_port,
            origin,
            &self.state.remote_bindings,
        )
        .await
    }

    /// Stop all accept loops and cancel the remote listeners on the server.
    ///
    /// Cancellation failures are logged; the server drops the listeners with
    /// the connection anyway.
    pub async fn shutdown<S>(&self, session: Option<S>)
    where
        S: ForwardSession,
    {
        let registrations: Vec<RemoteRegistration> = self.state.remote_bindings.lock().await.drain(..).collect();
        self.cancel_tasks().await;
        if let Some(session) = session {
            for entry in registrations {
                if let Err(err) = session
                    .cancel_tcpip_forwarding(entry.bind_address.clone(), entry.actual_port)
                    .await
                {
                    warn!(error = %err, bind = %entry.bind_address, port = entry.actual_port, "failed to cancel remote forward");
                }
            }
        }
    }

    fn on_failure(&self, direction: ForwardDirection, spec: &PortForward, err: SshCoreError) -> Result<ForwardOutcome> {
        match self.state.config.policy {
            ForwardFailurePolicy::AllOrNothing => Err(err),
            ForwardFailurePolicy::BestEffort => {
                warn!(%direction, forward = ?spec, error = %err, "forward unavailable; continuing without it");
                Ok(ForwardOutcome {
                    direction,
                    forward: spec.clone(),
                    result: Err(err.to_string()),
                })
            }
        }
    }

    async fn spawn_task<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.state.tasks.lock().await.push(handle);
    }

    async fn cancel_tasks(&self) {
        let mut tasks = self.state.tasks.lock().await;
        for handle in tasks.drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
