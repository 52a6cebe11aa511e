use std::io;

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    task::JoinSet,
};
use tracing::debug;

use crate::SshCoreError;

type Result<T> = crate::SshResult<T>;

/// Relay bytes between `local` and `remote` until either direction ends.
///
/// Each direction copies until its source reaches end-of-stream or fails and
/// then shuts its sink down. The first direction to finish decides the
/// outcome; the other one is aborted, so both streams are dropped (and thus
/// closed) by the time this returns.
pub async fn tunnel<L, R>(local: L, remote: R) -> Result<()>
where
    L: AsyncRead + AsyncWrite + Send + 'static,
    R: AsyncRead + AsyncWrite + Send + 'static,
{
    let (local_read, local_write) = tokio::io::split(local);
    let (remote_read, remote_write) = tokio::io::split(remote);

    let mut copies = JoinSet::new();
    copies.spawn(pipe(local_read, remote_write, "local->remote"));
    copies.spawn(pipe(remote_read, local_write, "remote->local"));

    let first = match copies.join_next().await {
        Some(Ok(outcome)) => outcome,
        Some(Err(join)) => Err(SshCoreError::Other(format!("relay task failed: {join}"))),
        None => Ok(()),
    };
    copies.shutdown().await;
    first
}

async fn pipe<S, D>(mut source: S, mut sink: D, direction: &'static str) -> Result<()>
where
    S: AsyncRead + Unpin,
    D: AsyncWrite + Unpin,
{
    let copied = tokio::io::copy(&mut source, &mut sink).await;
    let _ = sink.shutdown().await;
    match copied {
        Ok(bytes) => {
            debug!(direction, bytes, "relay direction finished");
            Ok(())
        }
        // Half-close races on teardown are a normal end of a connection.
        Err(err) if is_disconnect(&err) => {
            debug!(direction, error = %err, "relay peer went away");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}
