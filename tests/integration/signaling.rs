//! The signaling HTTP endpoint.

use std::net::TcpListener;

use orchid::node::Node;
use tokio::time::{sleep, Duration};

use crate::{init_log, offer_of, peer};

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn serve() -> u16 {
    init_log();
    let node = Node::new(Vec::new());
    let port = free_port();
    actix_web::rt::spawn(orchid::api::run(port, node));
    sleep(Duration::from_millis(300)).await;
    port
}

#[actix_web::test]
async fn posted_offers_get_answers() {
    let port = serve().await;

    let client_peer = peer().await;
    let _channel =
        client_peer.create_data_channel("session", None).await.unwrap();
    let offer = offer_of(&client_peer).await;

    let client = awc::Client::default();
    let mut response = client
        .post(format!("http://127.0.0.1:{}/", port))
        .send_body(offer)
        .await
        .unwrap();
    assert_eq!(response.status(), awc::http::StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    assert!(content_type.starts_with("text/plain"), "{}", content_type);
    let body = response.body().await.unwrap();
    let answer = std::str::from_utf8(&body).unwrap();
    assert!(answer.starts_with("v=0"), "answer:\n{}", answer);
    assert!(answer.contains("a=fingerprint"), "answer:\n{}", answer);
}

#[actix_web::test]
async fn unusable_offers_get_an_empty_404() {
    let port = serve().await;

    let client = awc::Client::default();
    let mut response = client
        .post(format!("http://127.0.0.1:{}/", port))
        .send_body("not an offer")
        .await
        .unwrap();
    assert_eq!(response.status(), awc::http::StatusCode::NOT_FOUND);
    let body = response.body().await.unwrap();
    assert!(body.is_empty());
}

#[actix_web::test]
async fn every_other_route_is_an_empty_200() {
    let port = serve().await;

    let client = awc::Client::default();
    let mut response = client
        .get(format!("http://127.0.0.1:{}/anything/else", port))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), awc::http::StatusCode::OK);
    let body = response.body().await.unwrap();
    assert!(body.is_empty());
}
