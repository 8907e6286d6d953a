//! Binding between a session's secure channel and its space.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use orchid_buffer::{Beam, Buffer};
use tokio::sync::mpsc;
use webrtc::data_channel::{
    data_channel_message::DataChannelMessage, RTCDataChannel,
};

use crate::{
    node::Ship,
    pipe::{Drain, Pipe, PipeError},
    prelude::*,
    proto::Common,
    space::Space,
};

/// Glue between one session channel and the space registered under the
/// peer's identity.
///
/// The conduit owns its space and holds a reference to itself that is
/// cleared only when the transport stops, so frames in flight always have a
/// live conduit behind them; the space in turn keeps only a non-owning
/// back-pointer, cleared on dissociation. Inbound frames are queued and
/// dispatched by a single task, in arrival order, so transport callbacks
/// never block.
pub struct Conduit {
    self_: Mutex<Option<Arc<Conduit>>>,
    space: Mutex<Option<Arc<Space>>>,
    channel: Arc<RTCDataChannel>,
    frames: mpsc::UnboundedSender<Beam>,
}

impl Conduit {
    /// Spawns a conduit over `channel` for the peer identified by `common`:
    /// looks its space up through `ship`, associates with it, and starts the
    /// dispatch task.
    pub fn spawn(
        ship: Arc<dyn Ship>,
        common: Common,
        channel: Arc<RTCDataChannel>,
    ) -> Arc<Conduit> {
        let (frames, mut queue) = mpsc::unbounded_channel();
        let conduit = Arc::new(Conduit {
            self_: Mutex::new(None),
            space: Mutex::new(None),
            channel: Arc::clone(&channel),
            frames,
        });
        *conduit.self_.lock().unwrap() = Some(Arc::clone(&conduit));

        tokio::spawn({
            let conduit = Arc::downgrade(&conduit);
            async move {
                let space = ship.find(&common);
                match conduit.upgrade() {
                    Some(conduit) => {
                        let input: Arc<dyn Pipe> = Arc::clone(&conduit) as Arc<dyn Pipe>;
                        space.associate(&input);
                        *conduit.space.lock().unwrap() = Some(Arc::clone(&space));
                    }
                    None => return,
                }
                while let Some(frame) = queue.recv().await {
                    space.call(frame).await;
                }
            }
        });

        let landing = Arc::downgrade(&conduit);
        channel.on_message(Box::new(move |message: DataChannelMessage| {
            if let Some(conduit) = landing.upgrade() {
                conduit.land(Beam::from(message.data));
            }
            Box::pin(async {})
        }));

        let closing = Arc::downgrade(&conduit);
        channel.on_close(Box::new(move || {
            if let Some(conduit) = closing.upgrade() {
                conduit.stop(PipeError::Detached);
            }
            Box::pin(async {})
        }));

        let failing = Arc::downgrade(&conduit);
        channel.on_error(Box::new(move |error| {
            if let Some(conduit) = failing.upgrade() {
                conduit.stop(PipeError::Rtc(error));
            }
            Box::pin(async {})
        }));

        conduit
    }
}

#[async_trait]
impl Pipe for Conduit {
    /// Bills the space one unit and forwards into the session channel.
    async fn send(&self, data: &(dyn Buffer + Sync)) -> Result<(), PipeError> {
        let space = self.space.lock().unwrap().clone();
        if let Some(space) = space {
            space.bill(1);
        }
        let _ = self.channel.send(&Bytes::from(data.to_vec())).await?;
        Ok(())
    }

    async fn shut(&self) -> Result<(), PipeError> {
        self.channel.close().await?;
        Ok(())
    }
}

impl Drain for Conduit {
    /// Enqueues an inbound frame for dispatch; never blocks the transport.
    fn land(&self, data: Beam) {
        let _ = self.frames.send(data);
    }

    /// Transport stopped: shut the channel, tear the space down, drop the
    /// self-reference once the remaining work has completed.
    fn stop(&self, error: PipeError) {
        let this = match self.self_.lock().unwrap().take() {
            Some(this) => this,
            None => return,
        };
        debug!("session stopped: {}", error);
        tokio::spawn(async move {
            if let Err(error) = this.channel.close().await {
                trace!("session channel close: {}", error);
            }
            let space = this.space.lock().unwrap().clone();
            if let Some(space) = space {
                let _ = space.shut().await;
                let input: Arc<dyn Pipe> = Arc::clone(&this) as Arc<dyn Pipe>;
                space.dissociate(&input);
            }
        });
    }
}

impl Drop for Conduit {
    fn drop(&mut self) {
        trace!("conduit retired");
    }
}
