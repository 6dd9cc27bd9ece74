//! Integration tests: HTTP surface via `tower::ServiceExt::oneshot`, the
//! WebSocket surface against a real listener with a tungstenite client.
//!
//! Run with `cargo test`. Everything is in-process; no external services.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use driplet::config::{Config, EndpointConfig, GlobalConfig};
use driplet::{create_app, AppState};
use futures::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_tungstenite::tungstenite;
use tower::util::ServiceExt;

const API_SECRET: &str = "test-api-secret";
const JWT_SECRET: &str = "test-jwt-secret";

fn test_state() -> AppState {
    let mut endpoints = HashMap::new();
    endpoints.insert(
        "test".to_string(),
        EndpointConfig {
            api_secret: API_SECRET.to_string(),
            jwt_secret: JWT_SECRET.to_string(),
        },
    );
    AppState::new(Config {
        global: GlobalConfig::default(),
        endpoints,
    })
}

/// Serves the app on an ephemeral port. The returned state shares the hub
/// with the server, so oneshot publishes reach live sockets.
async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_app(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn sign(body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(API_SECRET.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn publish_body(nonce: &str, topic: &str, target: Value) -> String {
    json!({
        "nonce": nonce,
        "timestamp": chrono::Utc::now().timestamp(),
        "message": { "hello": "world" },
        "topic": topic,
        "target": target
    })
    .to_string()
}

fn publish_request(endpoint: &str, body: &str, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/api/{endpoint}/message"))
        .header("content-type", "application/json");
    if let Some(sig) = signature {
        builder = builder.header("x-driplet-signature", sig);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn subscriber_token(secret: &str, custom: Value) -> String {
    let claims = json!({
        "exp": chrono::Utc::now().timestamp() + 3600,
        "custom": custom
    });
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

async fn body_json(res: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

type ClientSocket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(addr: SocketAddr, endpoint: &str, token: &str) -> ClientSocket {
    let url = format!("ws://{addr}/ws/{endpoint}?token={token}");
    let (socket, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("websocket should connect");
    socket
}

async fn subscribe(socket: &mut ClientSocket, topic: &str) {
    let frame = json!({ "type": "subscribe", "topic": topic }).to_string();
    socket
        .send(tungstenite::Message::Text(frame))
        .await
        .expect("subscribe frame should send");
}

async fn recv_json(socket: &mut ClientSocket) -> Value {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed unexpectedly")
            .expect("frame should decode");
        match next {
            tungstenite::Message::Text(payload) => {
                return serde_json::from_str(&payload).expect("text frame should be json");
            }
            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Publishes until the delivered count matches, absorbing the window where a
/// subscribe frame is still in flight toward the read loop.
async fn publish_until_delivered(
    app: &axum::Router,
    endpoint: &str,
    topic: &str,
    target: Value,
    want: u64,
) {
    for attempt in 0..200u32 {
        let body = publish_body(&format!("nonce-{attempt}-{topic}"), topic, target.clone());
        let res = app
            .clone()
            .oneshot(publish_request(endpoint, &body, Some(&sign(&body))))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        if body_json(res).await["delivered"] == json!(want) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("never delivered to {want} subscribers");
}

#[tokio::test]
async fn health_returns_ok() {
    let app = create_app(test_state());
    let res = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn ping_known_and_unknown_endpoint() {
    let app = create_app(test_state());

    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/test/ping")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["endpoint"], "test");

    let res = app
        .oneshot(
            Request::builder()
                .uri("/api/nope/ping")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn publish_with_valid_signature_is_accepted() {
    let app = create_app(test_state());
    let body = publish_body("nonce-accept", "chat", json!({}));

    let res = app
        .oneshot(publish_request("test", &body, Some(&sign(&body))))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["ok"], true);
    // No subscribers connected.
    assert_eq!(json["delivered"], 0);
}

#[tokio::test]
async fn publish_without_signature_is_unauthorized() {
    let app = create_app(test_state());
    let body = publish_body("nonce-missing-sig", "chat", json!({}));

    let res = app
        .oneshot(publish_request("test", &body, None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn publish_with_bad_signature_is_unauthorized() {
    let app = create_app(test_state());
    let body = publish_body("nonce-bad-sig", "chat", json!({}));

    let res = app
        .oneshot(publish_request("test", &body, Some("deadbeef")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn replayed_nonce_is_unauthorized() {
    let app = create_app(test_state());
    let body = publish_body("nonce-replay", "chat", json!({}));
    let sig = sign(&body);

    let res = app
        .clone()
        .oneshot(publish_request("test", &body, Some(&sig)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .oneshot(publish_request("test", &body, Some(&sig)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(res).await;
    assert_eq!(json["error"], "nonce has already been used");
}

#[tokio::test]
async fn stale_timestamp_is_unauthorized() {
    let app = create_app(test_state());
    let body = json!({
        "nonce": "nonce-stale",
        "timestamp": chrono::Utc::now().timestamp() - 120,
        "message": {},
        "topic": "chat"
    })
    .to_string();

    let res = app
        .oneshot(publish_request("test", &body, Some(&sign(&body))))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn publish_to_unknown_endpoint_is_not_found() {
    let app = create_app(test_state());
    let body = publish_body("nonce-unknown", "chat", json!({}));

    let res = app
        .oneshot(publish_request("unknown", &body, Some(&sign(&body))))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn publish_without_topic_is_bad_request() {
    let app = create_app(test_state());
    let body = json!({
        "nonce": "nonce-no-topic",
        "timestamp": chrono::Utc::now().timestamp(),
        "message": {}
    })
    .to_string();

    let res = app
        .oneshot(publish_request("test", &body, Some(&sign(&body))))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn publish_with_object_target_value_is_bad_request() {
    let app = create_app(test_state());
    let body = json!({
        "nonce": "nonce-bad-target",
        "timestamp": chrono::Utc::now().timestamp(),
        "message": {},
        "topic": "chat",
        "target": { "include": { "user": { "role": "admin" } } }
    })
    .to_string();

    let res = app
        .oneshot(publish_request("test", &body, Some(&sign(&body))))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn publish_with_malformed_body_is_bad_request() {
    let app = create_app(test_state());
    let body = "not json at all";

    let res = app
        .oneshot(publish_request("test", body, Some(&sign(body))))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

fn upgrade_error_status(err: tungstenite::Error) -> StatusCode {
    match err {
        tungstenite::Error::Http(res) => {
            StatusCode::from_u16(res.status().as_u16()).unwrap()
        }
        other => panic!("expected http error, got {other:?}"),
    }
}

#[tokio::test]
async fn ws_unknown_endpoint_is_not_found() {
    let addr = spawn_server(test_state()).await;
    let token = subscriber_token(JWT_SECRET, json!({}));

    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/unknown?token={token}"))
        .await
        .expect_err("connect should be refused");
    assert_eq!(upgrade_error_status(err), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ws_bad_token_is_unauthorized() {
    let addr = spawn_server(test_state()).await;

    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/test?token=garbage"))
        .await
        .expect_err("connect should be refused");
    assert_eq!(upgrade_error_status(err), StatusCode::UNAUTHORIZED);

    // Signed with the wrong secret.
    let token = subscriber_token("other-secret", json!({}));
    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/test?token={token}"))
        .await
        .expect_err("connect should be refused");
    assert_eq!(upgrade_error_status(err), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn subscriber_receives_matching_broadcasts() {
    let state = test_state();
    let app = create_app(state.clone());
    let addr = spawn_server(state).await;

    let mut socket = connect(addr, "test", &subscriber_token(JWT_SECRET, json!({}))).await;
    subscribe(&mut socket, "chat").await;

    publish_until_delivered(&app, "test", "chat", json!({}), 1).await;

    let envelope = recv_json(&mut socket).await;
    assert_eq!(envelope["topic"], "chat");
    assert_eq!(envelope["endpoint"], "test");
    assert_eq!(envelope["message"]["hello"], "world");
}

#[tokio::test]
async fn targeting_selects_subscribers_by_claims() {
    let state = test_state();
    let app = create_app(state.clone());
    let addr = spawn_server(state).await;

    let mut admin = connect(
        addr,
        "test",
        &subscriber_token(JWT_SECRET, json!({ "role": "admin" })),
    )
    .await;
    let mut user = connect(
        addr,
        "test",
        &subscriber_token(JWT_SECRET, json!({ "role": "user" })),
    )
    .await;
    // The read loop handles frames in order, so once the probe topic is
    // visible to broadcasts, `chat` is too.
    subscribe(&mut admin, "chat").await;
    subscribe(&mut admin, "probe-admin").await;
    subscribe(&mut user, "chat").await;
    subscribe(&mut user, "probe-user").await;
    publish_until_delivered(&app, "test", "probe-admin", json!({}), 1).await;
    publish_until_delivered(&app, "test", "probe-user", json!({}), 1).await;

    // Only the admin matches the include rule.
    let body = publish_body(
        "nonce-targeted",
        "chat",
        json!({ "include": { "role": "admin" } }),
    );
    let res = app
        .clone()
        .oneshot(publish_request("test", &body, Some(&sign(&body))))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["delivered"], 1);

    // An untargeted publish reaches both.
    let body = publish_body("nonce-everyone", "chat", json!({}));
    let res = app
        .clone()
        .oneshot(publish_request("test", &body, Some(&sign(&body))))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["delivered"], 2);

    // admin: probe, targeted, untargeted — in enqueue order.
    assert_eq!(recv_json(&mut admin).await["topic"], "probe-admin");
    let envelope = recv_json(&mut admin).await;
    assert_eq!(envelope["target"]["include"]["role"], "admin");
    assert_eq!(recv_json(&mut admin).await["topic"], "chat");

    // user: probe, then only the untargeted publish.
    assert_eq!(recv_json(&mut user).await["topic"], "probe-user");
    let envelope = recv_json(&mut user).await;
    assert_eq!(envelope["topic"], "chat");
    assert!(envelope["target"]["include"].is_null());
}

#[tokio::test]
async fn subscriber_on_other_topic_is_not_delivered() {
    let state = test_state();
    let app = create_app(state.clone());
    let addr = spawn_server(state).await;

    let mut news = connect(addr, "test", &subscriber_token(JWT_SECRET, json!({}))).await;
    let mut chat = connect(addr, "test", &subscriber_token(JWT_SECRET, json!({}))).await;
    subscribe(&mut news, "news").await;
    subscribe(&mut chat, "chat").await;

    // Delivered stays at 1: only the chat subscriber matches.
    publish_until_delivered(&app, "test", "chat", json!({}), 1).await;
    let envelope = recv_json(&mut chat).await;
    assert_eq!(envelope["topic"], "chat");
}
