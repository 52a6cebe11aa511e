use russh::{
    Channel, ChannelMsg, Disconnect,
    client::{self, Handle},
};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

pub type SessionHandle<H> = Handle<H>;
pub type SharedSessionHandle<H> = Arc<Handle<H>>;

pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Streams attached to a remote command. Unset outputs are discarded.
#[derive(Default)]
pub struct CommandIo {
    pub stdin: Option<BoxedReader>,
    pub stdout: Option<BoxedWriter>,
    pub stderr: Option<BoxedWriter>,
}

/// How a remote command ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandExit {
    Status(u32),
    Signal { name: String, core_dumped: bool, message: String },
    /// The channel closed without an exit status or signal.
    Missing,
}

/// Execute `command` on `channel` and pump its standard streams until it ends.
pub async fn run_command(channel: &mut Channel<client::Msg>, command: &str, io: CommandIo) -> crate::SshResult<CommandExit> {
    let CommandIo {
        stdin,
        mut stdout,
        mut stderr,
    } = io;
    channel.exec(true, command.as_bytes()).await?;
    info!(command, "remote command started");

    let stdin_task = stdin.map(|mut reader| {
        let mut writer = Box::pin(channel.make_writer());
        tokio::spawn(async move {
            if let Err(err) = tokio::io::copy(&mut reader, &mut writer).await {
                debug!(error = %err, "remote stdin copy ended");
            }
            let _ = writer.shutdown().await;
        })
    });

    let mut exit = CommandExit::Missing;
    // Exit status usually trails EOF, so only Close ends the loop.
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => write_output(&mut stdout, &data).await?,
            ChannelMsg::ExtendedData { data, ext: 1 } => write_output(&mut stderr, &data).await?,
            ChannelMsg::ExitStatus { exit_status } => exit = CommandExit::Status(exit_status),
            ChannelMsg::ExitSignal {
                signal_name,
                core_dumped,
                error_message,
                ..
            } => {
                exit = CommandExit::Signal {
                    name: format!("{signal_name:?}"),
                    core_dumped,
                    message: error_message,
                }
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    if let Some(task) = stdin_task {
        task.abort();
    }
    debug!(?exit, "remote command finished");
    Ok(exit)
}

async fn write_output(sink: &mut Option<BoxedWriter>, data: &[u8]) -> crate::SshResult<()> {
    if let Some(writer) = sink {
        writer.write_all(data).await?;
        writer.flush().await?;
    }
    Ok(())
}

pub async fn disconnect<H>(session: &SessionHandle<H>)
where
    H: client::Handler + Send,
{
    let _ = session.disconnect(Disconnect::ByApplication, "", "").await;
}
