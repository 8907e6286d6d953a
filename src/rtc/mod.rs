//! Glue to the WebRTC stack: shared peer-connection construction, the
//! outgoing and incoming connection roles, and SDP post-processing. This is
//! the only module in which the `webrtc` crate's types appear.

mod incoming;
mod outgoing;
pub mod sdp;

use std::sync::Arc;

use derive_more::{Display, From};
use webrtc::{
    api::{
        media_engine::MediaEngine, setting_engine::SettingEngine, APIBuilder,
    },
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState, RTCPeerConnection,
    },
};

#[doc(inline)]
pub use incoming::{Incoming, RespondError};
#[doc(inline)]
pub use outgoing::Outgoing;

/// Errors raised while driving an [`Outgoing`] connection.
#[derive(Debug, Display, From)]
pub enum RtcError {
    /// The WebRTC stack rejected an operation.
    #[display(fmt = "WebRTC stack failed: {}", _0)]
    Stack(webrtc::Error),

    /// ICE never reached the connected state.
    #[display(fmt = "negotiation failed in state {:?}", _0)]
    #[from(ignore)]
    Negotiation(RTCPeerConnectionState),

    /// The connection went away underneath the operation.
    #[display(fmt = "connection is closed")]
    Closed,
}

/// Builds a peer connection advertising the configured ICE servers.
///
/// Loopback candidates are gathered too: gateway peers routinely live on the
/// same host during tests and single-machine deployments.
pub(crate) async fn connect(
    ices: &[String],
) -> Result<Arc<RTCPeerConnection>, webrtc::Error> {
    let mut media = MediaEngine::default();
    media.register_default_codecs()?;

    let mut setting = SettingEngine::default();
    setting.set_include_loopback_candidate(true);

    let api = APIBuilder::new()
        .with_media_engine(media)
        .with_setting_engine(setting)
        .build();

    let ice_servers = if ices.is_empty() {
        Vec::new()
    } else {
        vec![RTCIceServer {
            urls: ices.to_vec(),
            ..RTCIceServer::default()
        }]
    };
    let config = RTCConfiguration {
        ice_servers,
        ..RTCConfiguration::default()
    };

    Ok(Arc::new(api.new_peer_connection(config).await?))
}
