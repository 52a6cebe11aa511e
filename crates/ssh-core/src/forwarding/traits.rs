use async_trait::async_trait;
use russh::{Channel, ChannelStream, client};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::session::{SessionHandle, SharedSessionHandle};

type Result<T> = crate::SshResult<T>;

/// Trait for streams that can be used for forwarding.
pub trait ForwardStreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ForwardStreamIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type alias for boxed forward streams.
pub type ForwardStream = Box<dyn ForwardStreamIo>;

/// Sessions that can open `direct-tcpip` channels and tear down remote listeners.
#[async_trait]
pub trait ForwardSession: Clone + Send + Sync + 'static {
    async fn open_direct_tcpip(
        &self,
        target_host: String,
        target_port: u16,
        origin_host: String,
        origin_port: u16,
    ) -> Result<ForwardStream>;

    async fn cancel_tcpip_forwarding(&self, bind_address: String, port: u32) -> Result<()>;
}

/// Channels the server opens towards us for a remote listener.
#[async_trait]
pub trait RemoteForwardChannel: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    fn into_stream(self) -> Self::Stream;
    async fn close(self) -> Result<()>;
}

/// Asks the server to listen on our behalf (`tcpip-forward`).
#[async_trait]
pub trait RemoteRegistrar {
    /// Returns the port the server bound; `0` means the requested port.
    async fn request_tcpip_forward(&mut self, bind_address: String, bind_port: u16) -> Result<u32>;
}

#[async_trait]
impl<H> ForwardSession for SharedSessionHandle<H>
where
    H: client::Handler + Send + Sync + 'static,
{
    async fn open_direct_tcpip(
        &self,
        target_host: String,
        target_port: u16,
        origin_host: String,
        origin_port: u16,
    ) -> Result<ForwardStream> {
        let channel = self
            .as_ref()
            .channel_open_direct_tcpip(target_host, target_port.into(), origin_host, origin_port.into())
            .await?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn cancel_tcpip_forwarding(&self, bind_address: String, port: u32) -> Result<()> {
        self.as_ref().cancel_tcpip_forward(bind_address, port).await?;
        Ok(())
    }
}

#[async_trait]
impl<H> RemoteRegistrar for SessionHandle<H>
where
    H: client::Handler + Send,
{
    async fn request_tcpip_forward(&mut self, bind_address: String, bind_port: u16) -> Result<u32> {
        let assigned = self.tcpip_forward(bind_address, bind_port.into()).await?;
        Ok(assigned)
    }
}

#[async_trait]
impl RemoteForwardChannel for Channel<client::Msg> {
    type Stream = ChannelStream<client::Msg>;

    fn into_stream(self) -> Self::Stream {
        Channel::into_stream(self)
    }

    async fn close(self) -> Result<()> {
        Channel::close(&self).await?;
        Ok(())
    }
}
