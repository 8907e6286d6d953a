//! A whole session end to end: offer through the responder, session channel
//! up, frames over the channel, datagrams on the wire.

use bytes::Bytes;
use orchid::{
    buffer::{Beam, Buffer},
    node::{Back as _, Node},
    proto::Tag,
};
use tokio::{
    net::UdpSocket,
    sync::mpsc,
    time::{timeout, Duration},
};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::{init_log, offer_of, peer, split, tag};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_tunnels_udp_end_to_end() {
    init_log();
    let node = Node::new(Vec::new());

    let client = peer().await;
    let channel = client.create_data_channel("session", None).await.unwrap();

    let (replies_tx, mut replies) = mpsc::unbounded_channel();
    channel.on_message(Box::new(move |message| {
        let _ = replies_tx.send(message.data);
        Box::pin(async {})
    }));
    let (open_tx, mut open_rx) = mpsc::unbounded_channel();
    channel.on_open(Box::new(move || {
        let _ = open_tx.send(());
        Box::pin(async {})
    }));

    let offer = offer_of(&client).await;
    let answer = node.respond(&offer).await.unwrap();
    client
        .set_remote_description(RTCSessionDescription::answer(answer).unwrap())
        .await
        .unwrap();
    let _ = timeout(Duration::from_secs(30), open_rx.recv())
        .await
        .expect("timed out waiting for the session channel");

    let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = receiver.local_addr().unwrap().to_string();

    // connect
    let frame = Beam::copy(&(tag(1), Tag::CONNECT, tag(9), target.as_str()));
    channel.send(&Bytes::from(frame.to_vec())).await.unwrap();
    let reply = Beam::from(
        timeout(Duration::from_secs(30), replies.recv())
            .await
            .expect("timed out waiting for the connect reply")
            .unwrap(),
    );
    let (nonce, endpoint) = split(&reply);
    assert_eq!(nonce, tag(1));
    let endpoint = String::from_utf8(endpoint).unwrap();
    assert!(endpoint.starts_with("127.0.0.1:"), "endpoint {}", endpoint);

    // forward
    let frame = Beam::copy(&(tag(9), &b"ping"[..]));
    channel.send(&Bytes::from(frame.to_vec())).await.unwrap();
    let mut data = [0; 64];
    let (size, from) =
        timeout(Duration::from_secs(10), receiver.recv_from(&mut data))
            .await
            .expect("timed out waiting for the datagram")
            .unwrap();
    assert_eq!(&data[..size], b"ping");
    assert_eq!(from.to_string(), endpoint);

    // reverse
    receiver.send_to(b"pong", from).await.unwrap();
    let reply = Beam::from(
        timeout(Duration::from_secs(10), replies.recv())
            .await
            .expect("timed out waiting for the landing")
            .unwrap(),
    );
    let (route, payload) = split(&reply);
    assert_eq!(route, tag(9));
    assert_eq!(payload, b"pong");
}
