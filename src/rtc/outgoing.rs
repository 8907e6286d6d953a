//! Peer connections the gateway initiates on a client's behalf.

use std::{
    process,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use tokio::sync::watch;
use webrtc::{
    data_channel::{data_channel_init::RTCDataChannelInit, RTCDataChannel},
    peer_connection::{
        peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

use crate::prelude::*;

use super::RtcError;

/// Where an [`Outgoing`] stands in its lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Stage {
    Fresh,
    Offered,
    Negotiated,
    Channeled,
    Closed,
}

/// A server-driven peer connection: offered to the client in-band, answered
/// by whatever far end the client is brokering for, and then used as a
/// carrier for tunneled data channels.
///
/// Once the connection has been established, its transport failures are
/// considered unrecoverable and abort the process.
pub struct Outgoing {
    peer: Arc<RTCPeerConnection>,
    stage: Mutex<Stage>,
    established: Arc<AtomicBool>,
    state: watch::Receiver<RTCPeerConnectionState>,
}

impl Outgoing {
    /// Creates a fresh outgoing connection advertising `ices`.
    ///
    /// # Errors
    ///
    /// [`RtcError::Stack`] when the peer connection cannot be built.
    pub async fn new(ices: &[String]) -> Result<Outgoing, RtcError> {
        let peer = super::connect(ices).await?;

        // a pre-negotiated channel anchors the application section in the
        // offer before any tunneled channel exists; it is never announced
        // in-band, so the far end never sees it
        let _ = peer
            .create_data_channel(
                "anchor",
                Some(RTCDataChannelInit {
                    negotiated: Some(0),
                    ..RTCDataChannelInit::default()
                }),
            )
            .await?;

        let (state_tx, state) = watch::channel(RTCPeerConnectionState::New);
        let established = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&established);
        peer.on_peer_connection_state_change(Box::new(move |current| {
            trace!("outgoing connection state: {}", current);
            if current == RTCPeerConnectionState::Failed
                && flag.load(Ordering::SeqCst)
            {
                error!("established outgoing connection failed");
                process::abort();
            }
            let _ = state_tx.send(current);
            Box::pin(async {})
        }));

        // the gateway never accepts channels pushed from its own offer
        peer.on_data_channel(Box::new(|channel: Arc<RTCDataChannel>| {
            trace!("unsolicited channel \"{}\" ignored", channel.label());
            Box::pin(async {})
        }));

        Ok(Outgoing {
            peer,
            stage: Mutex::new(Stage::Fresh),
            established,
            state,
        })
    }

    /// Creates the local offer, gathers candidates, and returns the complete
    /// local SDP.
    ///
    /// # Errors
    ///
    /// [`RtcError`] when the offer cannot be created or applied.
    pub async fn offer(&self) -> Result<String, RtcError> {
        let offer = self.peer.create_offer(None).await?;
        let mut gathered = self.peer.gathering_complete_promise().await;
        self.peer.set_local_description(offer).await?;
        let _ = gathered.recv().await;
        let local = self
            .peer
            .local_description()
            .await
            .ok_or(RtcError::Closed)?;
        *self.stage.lock().unwrap() = Stage::Offered;
        Ok(local.sdp)
    }

    /// Applies the remote answer and waits for the connection to reach the
    /// connected state.
    ///
    /// # Errors
    ///
    /// [`RtcError::Negotiation`] when ICE fails instead of connecting.
    pub async fn negotiate(&self, answer: String) -> Result<(), RtcError> {
        let answer = RTCSessionDescription::answer(answer)?;
        self.peer.set_remote_description(answer).await?;

        let mut state = self.state.clone();
        loop {
            let current = *state.borrow();
            match current {
                RTCPeerConnectionState::Connected => {
                    self.established.store(true, Ordering::SeqCst);
                    *self.stage.lock().unwrap() = Stage::Negotiated;
                    return Ok(());
                }
                RTCPeerConnectionState::Failed
                | RTCPeerConnectionState::Closed => {
                    return Err(RtcError::Negotiation(current));
                }
                _ => {}
            }
            state.changed().await.map_err(|_| RtcError::Closed)?;
        }
    }

    /// Opens an in-band data channel on the connection.
    ///
    /// # Errors
    ///
    /// [`RtcError::Stack`] when the channel cannot be created.
    pub async fn channel(
        &self,
        label: &str,
    ) -> Result<Arc<RTCDataChannel>, RtcError> {
        let channel = self.peer.create_data_channel(label, None).await?;
        *self.stage.lock().unwrap() = Stage::Channeled;
        Ok(channel)
    }

    /// Tears the connection down. Safe to call any number of times.
    pub async fn close(&self) {
        *self.stage.lock().unwrap() = Stage::Closed;
        if let Err(error) = self.peer.close().await {
            trace!("outgoing close: {}", error);
        }
    }
}

impl Drop for Outgoing {
    fn drop(&mut self) {
        let stage = *self.stage.lock().unwrap();
        trace!("outgoing connection dropped in stage {:?}", stage);
        if stage != Stage::Closed {
            let peer = Arc::clone(&self.peer);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = peer.close().await;
                });
            }
        }
    }
}
