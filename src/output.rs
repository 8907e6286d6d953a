//! Tagged forwarders a space reaches its outbound endpoints through.

use std::{
    io,
    net::SocketAddr,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use bytes::Bytes;
use orchid_buffer::{Beam, Buffer};
use tokio::{
    net::UdpSocket,
    sync::watch,
    task::JoinHandle,
};
use webrtc::data_channel::{
    data_channel_message::DataChannelMessage,
    data_channel_state::RTCDataChannelState, RTCDataChannel,
};

use crate::{
    pipe::{Drain as _, Pipe, PipeError},
    prelude::*,
    proto::Tag,
    space::Space,
};

/// The forwarder wrapped by an [`Output`]: either a connected UDP socket or
/// a data channel riding an outgoing connection.
enum Inner {
    Udp {
        socket: Arc<UdpSocket>,
        reader: JoinHandle<()>,
    },
    Channel {
        channel: Arc<RTCDataChannel>,
        ready: watch::Receiver<bool>,
    },
}

/// A tagged forwarder owned by a space.
///
/// Outbound traffic is sent into the inner; every inbound datagram or
/// message bills the space one unit and lands on it prefixed with this
/// output's tag, which is how the client tells its streams apart.
pub struct Output {
    tag: Tag,
    inner: Inner,
}

impl Output {
    /// Opens a UDP output connected to `target` (a `host:port` string) and
    /// returns it along with the socket's local endpoint.
    ///
    /// # Errors
    ///
    /// [`io::Error`] when binding, resolution, or connecting fails.
    pub async fn connect(
        space: Weak<Space>,
        tag: Tag,
        target: &str,
    ) -> io::Result<(Output, SocketAddr)> {
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        socket.connect(target).await?;
        let endpoint = socket.local_addr()?;

        let reader = tokio::spawn({
            let socket = Arc::clone(&socket);
            async move {
                let mut data = vec![0; 65536];
                loop {
                    let size = match socket.recv(&mut data).await {
                        Ok(size) => size,
                        Err(error) => {
                            if let Some(space) = space.upgrade() {
                                warn!(
                                    "datagram output {} failed: {}",
                                    tag, error
                                );
                                let _ = space.unplug(&tag);
                            }
                            return;
                        }
                    };
                    match space.upgrade() {
                        Some(space) => {
                            space.bill(1);
                            space.land(Beam::copy(&(tag, &data[..size])));
                        }
                        None => return,
                    }
                }
            }
        });

        let output = Output {
            tag,
            inner: Inner::Udp { socket, reader },
        };
        Ok((output, endpoint))
    }

    /// Wraps a data channel created on an outgoing connection.
    ///
    /// Inbound messages land on the space immediately; the channel's open
    /// handshake is awaited separately through [`Output::ready`].
    pub fn channel(
        space: Weak<Space>,
        tag: Tag,
        channel: Arc<RTCDataChannel>,
    ) -> Output {
        let (ready_tx, ready) = watch::channel(false);
        let ready_tx = Arc::new(ready_tx);

        let opened = Arc::clone(&ready_tx);
        channel.on_open(Box::new(move || {
            let _ = opened.send(true);
            Box::pin(async {})
        }));
        if channel.ready_state() == RTCDataChannelState::Open {
            let _ = ready_tx.send(true);
        }

        let landing = space.clone();
        channel.on_message(Box::new(move |message: DataChannelMessage| {
            if let Some(space) = landing.upgrade() {
                space.bill(1);
                space.land(Beam::copy(&(tag, message.data)));
            }
            Box::pin(async {})
        }));

        let closing = space.clone();
        channel.on_close(Box::new(move || {
            if let Some(space) = closing.upgrade() {
                trace!("channel output {} closed by far end", tag);
                let _ = space.unplug(&tag);
            }
            Box::pin(async {})
        }));

        channel.on_error(Box::new(move |error| {
            if let Some(space) = space.upgrade() {
                warn!("channel output {} failed: {}", tag, error);
                let _ = space.unplug(&tag);
            }
            Box::pin(async {})
        }));

        Output {
            tag,
            inner: Inner::Channel { channel, ready },
        }
    }

    /// The tag this output's inbound traffic is prefixed with.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// The open handshake of a channel-backed output: resolves `true` once
    /// the channel is usable. `None` for datagram outputs.
    pub fn ready(&self) -> Option<watch::Receiver<bool>> {
        match &self.inner {
            Inner::Udp { .. } => None,
            Inner::Channel { ready, .. } => Some(ready.clone()),
        }
    }
}

#[async_trait]
impl Pipe for Output {
    async fn send(&self, data: &(dyn Buffer + Sync)) -> Result<(), PipeError> {
        match &self.inner {
            Inner::Udp { socket, .. } => {
                let _ = socket.send(&data.to_vec()).await?;
                Ok(())
            }
            Inner::Channel { channel, .. } => {
                let _ = channel.send(&Bytes::from(data.to_vec())).await?;
                Ok(())
            }
        }
    }

    async fn shut(&self) -> Result<(), PipeError> {
        trace!("output {} shutting", self.tag);
        match &self.inner {
            Inner::Udp { reader, .. } => {
                reader.abort();
                Ok(())
            }
            Inner::Channel { channel, .. } => {
                channel.close().await?;
                Ok(())
            }
        }
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        match &self.inner {
            Inner::Udp { reader, .. } => reader.abort(),
            Inner::Channel { channel, .. } => {
                let channel = Arc::clone(channel);
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        let _ = channel.close().await;
                    });
                }
            }
        }
    }
}
