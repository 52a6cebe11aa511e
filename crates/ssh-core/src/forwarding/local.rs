use std::net::SocketAddr;

use dt_types::ssh::PortForward;
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinSet,
};
use tracing::{debug, info};

use super::{relay::tunnel, traits::ForwardSession};
use crate::SshCoreError;

type Result<T> = crate::SshResult<T>;

/// Bind the local listener for `spec`, returning it with the port actually bound.
pub(super) async fn bind_local_forward(spec: &PortForward) -> Result<(TcpListener, u16)> {
    let listener = TcpListener::bind((spec.local_addr.as_str(), spec.local_port))
        .await
        .map_err(|source| SshCoreError::BindFailed {
            address: spec.local_authority(),
            source,
        })?;
    let port = listener.local_addr()?.port();
    info!(
        bind = %format!("{}:{port}", spec.local_addr),
        target = %spec.remote_authority(),
        "local TCP forward listening"
    );
    Ok((listener, port))
}

/// Accept local connections and relay each through a `direct-tcpip` channel.
///
/// Relays belong to the loop: they are aborted when it returns or is aborted.
pub(super) async fn run_local_accept_loop<S>(listener: TcpListener, spec: PortForward, session: S) -> Result<()>
where
    S: ForwardSession,
{
    let mut relays = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, origin) = accepted?;
                let spec = spec.clone();
                let session = session.clone();
                relays.spawn(async move {
                    if let Err(err) = handle_local_connection(stream, origin, &spec, session).await {
                        debug!(target = %spec.remote_authority(), error = %err, "local forwarded connection ended");
                    }
                });
            }
            Some(_) = relays.join_next(), if !relays.is_empty() => {}
        }
    }
}

async fn handle_local_connection<S>(stream: TcpStream, origin: SocketAddr, spec: &PortForward, session: S) -> Result<()>
where
    S: ForwardSession,
{
    stream.set_nodelay(true).ok();
    let remote = session
        .open_direct_tcpip(spec.remote_addr.clone(), spec.remote_port, origin.ip().to_string(), origin.port())
        .await?;
    debug!(origin = %origin, target = %spec.remote_authority(), "relaying local forwarded connection");
    tunnel(stream, remote).await
}
