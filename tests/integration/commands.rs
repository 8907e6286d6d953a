//! Space command dispatch over an in-memory session pipe, with real UDP
//! sockets on loopback.

use orchid::{buffer::Beam, proto::Tag};
use tokio::{
    net::UdpSocket,
    time::{timeout, Duration},
};

use crate::{split, split_error, tag, Session};

async fn receiver() -> (UdpSocket, String) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = socket.local_addr().unwrap().to_string();
    (socket, target)
}

async fn recv(socket: &UdpSocket) -> (Vec<u8>, std::net::SocketAddr) {
    let mut data = [0; 2048];
    let (size, from) =
        timeout(Duration::from_secs(10), socket.recv_from(&mut data))
            .await
            .expect("timed out waiting for a datagram")
            .unwrap();
    (data[..size].to_vec(), from)
}

#[tokio::test]
async fn connect_replies_with_local_endpoint_and_forwards() {
    let mut session = Session::open();
    let (receiver, target) = receiver().await;

    session
        .call(&(tag(1), Tag::CONNECT, tag(9), target.as_str()))
        .await;
    let (nonce, endpoint) = split(&session.reply().await);
    assert_eq!(nonce, tag(1));
    let endpoint = String::from_utf8(endpoint).unwrap();
    assert!(endpoint.starts_with("127.0.0.1:"), "endpoint {}", endpoint);

    session.call(&(tag(9), &b"ping"[..])).await;
    let (payload, from) = recv(&receiver).await;
    assert_eq!(payload, b"ping");
    assert_eq!(from.to_string(), endpoint);
}

#[tokio::test]
async fn inbound_datagrams_land_tagged() {
    let mut session = Session::open();
    let (receiver, target) = receiver().await;

    session
        .call(&(tag(1), Tag::CONNECT, tag(9), target.as_str()))
        .await;
    let (_, endpoint) = split(&session.reply().await);
    let endpoint = String::from_utf8(endpoint).unwrap();

    receiver.send_to(b"pong", endpoint.as_str()).await.unwrap();
    let (route, payload) = split(&session.reply().await);
    assert_eq!(route, tag(9));
    assert_eq!(payload, b"pong");
}

#[tokio::test]
async fn close_erases_the_output() {
    let mut session = Session::open();
    let (_receiver, target) = receiver().await;

    session
        .call(&(tag(1), Tag::CONNECT, tag(9), target.as_str()))
        .await;
    let _ = session.reply().await;

    session.call(&(tag(2), Tag::CLOSE, tag(9))).await;
    let (nonce, payload) = split(&session.reply().await);
    assert_eq!(nonce, tag(2));
    assert!(payload.is_empty());

    // the tag no longer shadows commands, so the same data frame is now
    // (mis)interpreted as a command and fails
    session.call(&(tag(9), &b"junk"[..])).await;
    let (sentinel, _) = split(&session.reply().await);
    assert_eq!(sentinel, Tag::ZERO);
}

#[tokio::test]
async fn outputs_shadow_commands() {
    let mut session = Session::open();
    let (receiver, target) = receiver().await;

    session
        .call(&(tag(9), Tag::CONNECT, tag(9), target.as_str()))
        .await;
    let _ = session.reply().await;

    // a frame whose payload spells a command must still be forwarded as
    // opaque data
    let body = Beam::copy(&(Tag::CLOSE, tag(9)));
    session.call(&(tag(9), &body[..])).await;
    let (payload, _) = recv(&receiver).await;
    assert_eq!(payload.len(), 64);
    assert_eq!(payload, body[..].to_vec());
}

#[tokio::test]
async fn discard_swallows_without_any_reply() {
    let mut session = Session::open();
    session.call(&(tag(3), Tag::DISCARD)).await;
    session.no_reply().await;

    session
        .call(&(tag(3), Tag::DISCARD, &b"trailing garbage"[..]))
        .await;
    session.no_reply().await;
}

#[tokio::test]
async fn batch_of_discards_replies_empty() {
    let mut session = Session::open();
    session
        .call(&(
            tag(7),
            Tag::BATCH,
            (tag(11), Tag::DISCARD),
            (tag(12), Tag::DISCARD),
        ))
        .await;
    let (nonce, payload) = split(&session.reply().await);
    assert_eq!(nonce, tag(7));
    assert!(payload.is_empty());
}

#[tokio::test]
async fn batch_concatenates_replies_in_order() {
    let mut session = Session::open();
    let (_receiver, target) = receiver().await;

    session
        .call(&(
            tag(8),
            Tag::BATCH,
            (tag(21), Tag::DISCARD),
            (tag(22), Tag::CONNECT, tag(30), target.as_str()),
        ))
        .await;
    let (nonce, payload) = split(&session.reply().await);
    assert_eq!(nonce, tag(8));
    let endpoint = String::from_utf8(payload).unwrap();
    assert!(endpoint.starts_with("127.0.0.1:"), "endpoint {}", endpoint);
}

#[tokio::test]
async fn truncated_batch_subframe_is_wrapped() {
    let mut session = Session::open();
    session.call(&(tag(13), Tag::BATCH, &b"short"[..])).await;
    let (nonce, _message) = split_error(&session.reply().await);
    assert_eq!(nonce, tag(13));
}

#[tokio::test]
async fn failed_commands_wrap_and_the_space_survives() {
    let mut session = Session::open();

    session.call(&(tag(4), Tag::CLOSE, tag(99))).await;
    let (nonce, message) = split_error(&session.reply().await);
    assert_eq!(nonce, tag(4));
    assert!(!message.is_empty());

    // the same session keeps dispatching
    let (_receiver, target) = receiver().await;
    session
        .call(&(tag(5), Tag::CONNECT, tag(9), target.as_str()))
        .await;
    let (nonce, _) = split(&session.reply().await);
    assert_eq!(nonce, tag(5));
}

#[tokio::test]
async fn colliding_output_tags_are_refused() {
    let mut session = Session::open();
    let (_receiver, target) = receiver().await;

    session
        .call(&(tag(1), Tag::CONNECT, tag(9), target.as_str()))
        .await;
    let _ = session.reply().await;

    session
        .call(&(tag(2), Tag::CONNECT, tag(9), target.as_str()))
        .await;
    let (nonce, _message) = split_error(&session.reply().await);
    assert_eq!(nonce, tag(2));
}

#[tokio::test]
async fn unknown_commands_tear_the_space_down() {
    let mut session = Session::open();
    session.call(&(tag(5), tag(0xEE))).await;
    session.no_reply().await;
    assert!(session.input.is_shut());
}

#[tokio::test]
async fn billing_subtracts_one_unit_per_billable_step() {
    let mut session = Session::open();
    let (receiver, target) = receiver().await;
    assert_eq!(session.space.balance(), 0);

    // a swallowed frame costs its dispatch
    session.call(&(tag(3), Tag::DISCARD)).await;
    session.no_reply().await;
    assert_eq!(session.space.balance(), -1);

    // a command costs its dispatch plus the reply send
    session
        .call(&(tag(1), Tag::CONNECT, tag(9), target.as_str()))
        .await;
    let (_, endpoint) = split(&session.reply().await);
    let endpoint = String::from_utf8(endpoint).unwrap();
    assert_eq!(session.space.balance(), -3);

    // an output-routed frame costs its dispatch plus the route
    session.call(&(tag(9), &b"ping"[..])).await;
    let _ = recv(&receiver).await;
    assert_eq!(session.space.balance(), -5);

    // an inbound landing costs the landing plus the send to the client
    receiver.send_to(b"pong", endpoint.as_str()).await.unwrap();
    let _ = session.reply().await;
    assert_eq!(session.space.balance(), -7);
}
