//! Peer connections accepted from clients through the signaling endpoint.

use std::sync::{Arc, Mutex};

use derive_more::{Display, From};
use once_cell::sync::Lazy;
use regex::Regex;
use webrtc::{
    data_channel::RTCDataChannel,
    peer_connection::{
        peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

use crate::{conduit::Conduit, node::Ship, prelude::*, proto::Common};

/// Failures of the offer-to-answer exchange; surfaced by the signaling
/// endpoint as an empty `404`.
#[derive(Debug, Display, From)]
pub enum RespondError {
    /// The WebRTC stack rejected the offer or could not produce an answer.
    #[display(fmt = "WebRTC stack failed: {}", _0)]
    Stack(webrtc::Error),

    /// The offer carries no SHA-256 certificate fingerprint to key the
    /// peer's space under.
    #[display(fmt = "offer carries no usable certificate fingerprint")]
    Fingerprint,

    /// The local description disappeared mid-exchange.
    #[display(fmt = "local description unavailable")]
    Description,
}

/// The `a=fingerprint` attribute a peer offers its certificate under. The
/// transport handshake later proves possession, so the digest doubles as a
/// verified identity.
static FINGERPRINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^a=fingerprint:sha-256 ((?:[0-9A-Fa-f]{2}:){31}[0-9A-Fa-f]{2})\s*$")
        .unwrap()
});

/// A client-initiated peer connection. Each data channel the client opens on
/// it becomes one gateway session: a conduit bound to the space registered
/// under the client's certificate fingerprint.
///
/// Holds a reference to itself until its transport stops, so it outlives the
/// signaling request that spawned it.
pub struct Incoming {
    self_: Mutex<Option<Arc<Incoming>>>,
    ship: Arc<dyn Ship>,
    common: Mutex<Option<Common>>,
    peer: Arc<RTCPeerConnection>,
}

impl Incoming {
    /// Creates an incoming connection attached to `ship`.
    ///
    /// # Errors
    ///
    /// [`RespondError::Stack`] when the peer connection cannot be built.
    pub async fn spawn(
        ship: Arc<dyn Ship>,
        ices: &[String],
    ) -> Result<Arc<Incoming>, RespondError> {
        let peer = super::connect(ices).await?;
        let incoming = Arc::new(Incoming {
            self_: Mutex::new(None),
            ship,
            common: Mutex::new(None),
            peer,
        });
        *incoming.self_.lock().unwrap() = Some(Arc::clone(&incoming));

        let weak = Arc::downgrade(&incoming);
        incoming.peer.on_data_channel(Box::new(
            move |channel: Arc<RTCDataChannel>| {
                let weak = weak.clone();
                Box::pin(async move {
                    let incoming = match weak.upgrade() {
                        Some(incoming) => incoming,
                        None => return,
                    };
                    let common = { *incoming.common.lock().unwrap() };
                    match common {
                        Some(common) => {
                            debug!("session channel opened by {}", common);
                            let _conduit = Conduit::spawn(
                                Arc::clone(&incoming.ship),
                                common,
                                channel,
                            );
                        }
                        None => {
                            warn!("channel arrived before identity verification");
                        }
                    }
                })
            },
        ));

        let weak = Arc::downgrade(&incoming);
        incoming.peer.on_peer_connection_state_change(Box::new(
            move |state| {
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Closed
                ) {
                    if let Some(incoming) = weak.upgrade() {
                        incoming.stop();
                    }
                }
                Box::pin(async {})
            },
        ));

        Ok(incoming)
    }

    /// Consumes the client's offer and produces the local answer SDP,
    /// candidates gathered and all.
    ///
    /// # Errors
    ///
    /// [`RespondError`] when the offer is unusable or the stack fails.
    pub async fn answer(&self, offer: &str) -> Result<String, RespondError> {
        let common = fingerprint(offer).ok_or(RespondError::Fingerprint)?;
        *self.common.lock().unwrap() = Some(common);

        let offer = RTCSessionDescription::offer(offer.to_owned())?;
        self.peer.set_remote_description(offer).await?;
        let answer = self.peer.create_answer(None).await?;
        let mut gathered = self.peer.gathering_complete_promise().await;
        self.peer.set_local_description(answer).await?;
        let _ = gathered.recv().await;

        let local = self
            .peer
            .local_description()
            .await
            .ok_or(RespondError::Description)?;
        Ok(local.sdp)
    }

    fn stop(&self) {
        let this = self.self_.lock().unwrap().take();
        if let Some(this) = this {
            trace!("incoming connection stopped");
            tokio::spawn(async move {
                let _ = this.peer.close().await;
            });
        }
    }
}

/// Extracts the peer identity key from the offer's certificate fingerprint.
fn fingerprint(sdp: &str) -> Option<Common> {
    let digest = &FINGERPRINT.captures(sdp)?[1];
    let mut data = [0; 32];
    for (index, pair) in digest.split(':').take(32).enumerate() {
        data[index] = u8::from_str_radix(pair, 16).ok()?;
    }
    Some(Common::from(data))
}
