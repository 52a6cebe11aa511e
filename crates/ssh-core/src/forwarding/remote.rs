use dt_types::ssh::PortForward;
use tokio::{
    net::TcpStream,
    sync::{Mutex, mpsc},
    task::JoinSet,
};
use tracing::{debug, info, warn};

use super::{
    relay::tunnel,
    traits::{ForwardStream, RemoteForwardChannel, RemoteRegistrar},
};
use crate::SshCoreError;

type Result<T> = crate::SshResult<T>;

/// Forwarded connections that may wait for their accept loop before new ones are refused.
const PENDING_CONNECTIONS: usize = 32;

/// Server-side listener as tracked by the session handler.
pub(super) struct RemoteRegistration {
    pub bind_address: String,
    pub actual_port: u32,
    pub incoming: mpsc::Sender<IncomingConnection>,
}

/// A connection the server accepted on one of our remote listeners.
pub struct IncomingConnection {
    pub stream: ForwardStream,
    /// `host:port` of the peer that connected on the server side.
    pub origin: String,
}

/// Receiving end of a remote listener.
pub struct RemoteListener {
    address: String,
    incoming: mpsc::Receiver<IncomingConnection>,
}

impl RemoteListener {
    /// `bind:port` the server listens on.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Wait for the next forwarded connection.
    ///
    /// Fails with [`SshCoreError::ListenerClosed`] once the registration is
    /// dropped, which happens on shutdown or when the session goes away.
    pub async fn accept(&mut self) -> Result<IncomingConnection> {
        self.incoming.recv().await.ok_or_else(|| SshCoreError::ListenerClosed {
            address: self.address.clone(),
        })
    }
}

/// Ask the server to listen for `spec` and return the bound port with its listener.
///
/// The registration is recorded before the request goes out so a connection
/// the server forwards right after replying is not lost.
pub(super) async fn register_remote_forward<R>(
    spec: &PortForward,
    session: &mut R,
    remote_bindings: &Mutex<Vec<RemoteRegistration>>,
) -> Result<(u32, RemoteListener)>
where
    R: RemoteRegistrar + Send,
{
    let requested = u32::from(spec.remote_port);
    let (incoming_tx, incoming_rx) = mpsc::channel(PENDING_CONNECTIONS);
    remote_bindings.lock().await.push(RemoteRegistration {
        bind_address: spec.remote_addr.clone(),
        actual_port: requested,
        incoming: incoming_tx.clone(),
    });

    let assigned = match session.request_tcpip_forward(spec.remote_addr.clone(), spec.remote_port).await {
        Ok(assigned) => assigned,
        Err(err) => {
            remote_bindings
                .lock()
                .await
                .retain(|entry| !entry.incoming.same_channel(&incoming_tx));
            return Err(SshCoreError::listener_failed(spec.remote_authority(), err));
        }
    };

    let actual_port = if assigned != 0 { assigned } else { requested };
    if actual_port != requested {
        let mut registrations = remote_bindings.lock().await;
        if let Some(entry) = registrations.iter_mut().find(|entry| entry.incoming.same_channel(&incoming_tx)) {
            entry.actual_port = actual_port;
        }
    }

    let address = format!("{}:{actual_port}", spec.remote_addr);
    info!(bind = %address, target = %spec.local_authority(), "remote TCP forward registered");
    Ok((
        actual_port,
        RemoteListener {
            address,
            incoming: incoming_rx,
        },
    ))
}

/// Accept forwarded connections until the listener closes, relaying each to `target`.
///
/// Relays belong to the loop: they are aborted when it returns or is aborted.
pub(super) async fn run_remote_accept_loop(mut listener: RemoteListener, target: PortForward) -> Result<()> {
    let mut relays = JoinSet::new();
    loop {
        tokio::select! {
            connection = listener.accept() => {
                let connection = connection?;
                let target = target.clone();
                let bind = listener.address().to_string();
                relays.spawn(async move {
                    if let Err(err) = handle_remote_connection(connection, &target).await {
                        debug!(bind = %bind, target = %target.local_authority(), error = %err, "remote forwarded connection ended");
                    }
                });
            }
            Some(_) = relays.join_next(), if !relays.is_empty() => {}
        }
    }
}

/// Dial the local side of `target` and relay `connection` into it.
pub(super) async fn handle_remote_connection(connection: IncomingConnection, target: &PortForward) -> Result<()> {
    let local = TcpStream::connect((target.local_addr.as_str(), target.local_port))
        .await
        .map_err(|source| SshCoreError::ConnectionFailed {
            address: target.local_authority(),
            source,
        })?;
    local.set_nodelay(true).ok();
    debug!(origin = %connection.origin, target = %target.local_authority(), "relaying remote forwarded connection");
    tunnel(local, connection.stream).await
}

/// Hand a `forwarded-tcpip` channel to the accept loop of its listener.
///
/// Never waits on the accept loop: a full or closed queue closes the channel.
pub(super) async fn dispatch_remote_channel<C>(
    channel: C,
    connected_address: &str,
    connected_port: u32,
    origin: String,
    remote_bindings: &Mutex<Vec<RemoteRegistration>>,
) -> Result<()>
where
    C: RemoteForwardChannel,
{
    let sender = resolve_remote_sender(connected_address, connected_port, remote_bindings).await;
    let Some(sender) = sender else {
        warn!(
            address = connected_address,
            port = connected_port,
            "received forwarded-tcpip with no matching remote forward"
        );
        let _ = channel.close().await;
        return Ok(());
    };

    match sender.try_reserve() {
        Ok(permit) => {
            permit.send(IncomingConnection {
                stream: Box::new(channel.into_stream()),
                origin,
            });
        }
        Err(err) => {
            warn!(
                address = connected_address,
                port = connected_port,
                error = %err,
                "remote listener is not accepting; dropping forwarded connection"
            );
            let _ = channel.close().await;
        }
    }
    Ok(())
}

/// Exact `(address, port)` match first, then any registration on that port.
///
/// Servers report the address they bound, which may differ in spelling from
/// what we asked for (`localhost` vs `127.0.0.1`, empty for wildcard).
async fn resolve_remote_sender(
    bound_address: &str,
    bound_port: u32,
    remote_bindings: &Mutex<Vec<RemoteRegistration>>,
) -> Option<mpsc::Sender<IncomingConnection>> {
    let registrations = remote_bindings.lock().await;
    registrations
        .iter()
        .find(|entry| entry.actual_port == bound_port && entry.bind_address == bound_address)
        .or_else(|| registrations.iter().find(|entry| entry.actual_port == bound_port))
        .map(|entry| entry.incoming.clone())
}
