//! Process stdin as an `AsyncRead` that never blocks runtime shutdown.
//!
//! A blocking read on stdin cannot be cancelled. Doing it on a detached
//! thread instead of the runtime's blocking pool lets the process exit while
//! a read is still pending.

use std::{
    io::{self, Read},
    pin::Pin,
    task::{Context, Poll, ready},
    thread,
};

use tokio::{
    io::{AsyncRead, ReadBuf},
    sync::mpsc,
};
use tracing::debug;

const CHUNK_SIZE: usize = 8 * 1024;
const QUEUED_CHUNKS: usize = 4;

/// Reader fed by a dedicated thread; see [`spawn_reader`].
#[derive(Debug)]
pub struct ThreadedReader {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    pos: usize,
}

/// Stdin of this process.
pub fn stdin() -> ThreadedReader {
    spawn_reader(io::stdin())
}

/// Read `source` on its own thread until end-of-stream, an error, or until
/// the returned reader is dropped and the next chunk has nowhere to go.
pub fn spawn_reader<R>(mut source: R) -> ThreadedReader
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel(QUEUED_CHUNKS);
    thread::spawn(move || {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(error = %err, "input reader stopped");
                    let _ = tx.blocking_send(Err(err));
                    break;
                }
            }
        }
    });
    ThreadedReader {
        rx,
        pending: Vec::new(),
        pos: 0,
    }
}

impl AsyncRead for ThreadedReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if this.pos >= this.pending.len() {
            match ready!(this.rx.poll_recv(cx)) {
                Some(Ok(chunk)) => {
                    this.pending = chunk;
                    this.pos = 0;
                }
                Some(Err(err)) => return Poll::Ready(Err(err)),
                // Sender gone: end of input.
                None => return Poll::Ready(Ok(())),
            }
        }
        let n = (this.pending.len() - this.pos).min(buf.remaining());
        buf.put_slice(&this.pending[this.pos..this.pos + n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}
