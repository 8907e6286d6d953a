//! The outgoing-connection lifecycle, negotiated against a real far-end
//! peer over loopback.

use bytes::Bytes;
use orchid::proto::Tag;
use tokio::{
    sync::mpsc,
    time::{timeout, Duration},
};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::{peer, split, tag, Session};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lifecycle_tunnels_a_channel() {
    let mut session = Session::open();

    // establish
    session.call(&(tag(40), Tag::ESTABLISH, tag(50))).await;
    let (nonce, payload) = split(&session.reply().await);
    assert_eq!((nonce, payload.len()), (tag(40), 0));

    // offer: an SCTP section, no private-network candidates
    session.call(&(tag(41), Tag::OFFER, tag(50))).await;
    let (nonce, offer) = split(&session.reply().await);
    assert_eq!(nonce, tag(41));
    let offer = String::from_utf8(offer).unwrap();
    assert!(offer.contains("m=application"), "offer:\n{}", offer);
    for line in offer.lines().filter(|l| l.starts_with("a=candidate:")) {
        let address = line.split(' ').nth(4).unwrap_or("");
        assert!(!address.starts_with("10."), "private candidate: {}", line);
    }

    // the far end answers and reports every channel pushed to it
    let far = peer().await;
    let (channels_tx, mut channels) = mpsc::unbounded_channel();
    let (messages_tx, mut messages) = mpsc::unbounded_channel();
    far.on_data_channel(Box::new(move |channel| {
        let messages_tx = messages_tx.clone();
        channel.on_message(Box::new(move |message| {
            let _ = messages_tx.send(message.data);
            Box::pin(async {})
        }));
        let _ = channels_tx.send(channel);
        Box::pin(async {})
    }));
    far.set_remote_description(
        RTCSessionDescription::offer(offer).unwrap(),
    )
    .await
    .unwrap();
    let answer = far.create_answer(None).await.unwrap();
    let mut gathered = far.gathering_complete_promise().await;
    far.set_local_description(answer).await.unwrap();
    let _ = gathered.recv().await;
    let answer = far.local_description().await.unwrap().sdp;

    // negotiate: resolves once the connection is up
    session
        .call(&(tag(42), Tag::NEGOTIATE, tag(50), answer.as_str()))
        .await;
    let (nonce, payload) = split(&session.reply().await);
    assert_eq!((nonce, payload.len()), (tag(42), 0));

    // channel + finish: the far end sees the tunneled channel open
    session.call(&(tag(43), Tag::CHANNEL, tag(50), tag(60))).await;
    let (nonce, payload) = split(&session.reply().await);
    assert_eq!((nonce, payload.len()), (tag(43), 0));

    session.call(&(tag(44), Tag::FINISH, tag(60))).await;
    let (nonce, payload) = split(&session.reply().await);
    assert_eq!((nonce, payload.len()), (tag(44), 0));

    let channel = timeout(Duration::from_secs(30), channels.recv())
        .await
        .expect("timed out waiting for the tunneled channel")
        .unwrap();
    assert_eq!(channel.label(), tag(60).to_string());

    // frames routed at the tag flow out over the channel
    session.call(&(tag(60), &b"hello"[..])).await;
    let message = timeout(Duration::from_secs(30), messages.recv())
        .await
        .expect("timed out waiting for tunneled data")
        .unwrap();
    assert_eq!(&message[..], b"hello");

    // and traffic from the far end lands back tagged
    channel.send(&Bytes::from_static(b"yo")).await.unwrap();
    let (route, payload) = split(&session.reply().await);
    assert_eq!(route, tag(60));
    assert_eq!(payload, b"yo");

    // cancel drops the outgoing
    session.call(&(tag(45), Tag::CANCEL, tag(50))).await;
    let (nonce, payload) = split(&session.reply().await);
    assert_eq!((nonce, payload.len()), (tag(45), 0));
}

#[tokio::test]
async fn offer_on_a_missing_handle_is_wrapped() {
    let mut session = Session::open();
    session.call(&(tag(46), Tag::OFFER, tag(51))).await;
    let (nonce, message) = crate::split_error(&session.reply().await);
    assert_eq!(nonce, tag(46));
    assert!(message.contains("no such entry"));
}

#[tokio::test]
async fn finish_on_a_datagram_output_is_wrapped() {
    let mut session = Session::open();
    let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = receiver.local_addr().unwrap().to_string();
    session
        .call(&(tag(1), Tag::CONNECT, tag(9), target.as_str()))
        .await;
    let _ = session.reply().await;

    session.call(&(tag(2), Tag::FINISH, tag(9))).await;
    let (nonce, message) = crate::split_error(&session.reply().await);
    assert_eq!(nonce, tag(2));
    assert!(message.contains("not a channel"));
}
