//! Echo backend integration tests.
//!
//! Tests run against an in-process `EchoServer` on a random port.

use common::echo::EchoRecord;
use futures::{SinkExt, StreamExt};
use kat_echo::server_harness::EchoServer;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Every path and method is echoed with the backend's name.
#[tokio::test]
async fn test_echoes_any_path_and_method() -> Result<(), anyhow::Error> {
    let server = EchoServer::spawn("plain-simplemapping-http-http").await?;
    let client = reqwest::Client::new();

    let response = client
        .put(format!("{}/simplemapping-http/deep/path?x=1", server.url()))
        .header("X-Foo", "foo")
        .body("payload")
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    assert_eq!(content_type.as_deref(), Some("application/json"));

    let record = EchoRecord::from_json(&response.text().await?)?;
    assert_eq!(record.backend, "plain-simplemapping-http-http");
    assert_eq!(record.request.method, "PUT");
    assert_eq!(record.request.url.path, "/simplemapping-http/deep/path");
    assert_eq!(record.request.url.query.as_deref(), Some("x=1"));
    assert_eq!(record.request.headers.first("x-foo"), Some("foo"));
    assert_eq!(record.request.host, server.authority());
    assert!(!record.request.tls.enabled);

    Ok(())
}

/// `Requested-Status` selects the response status.
#[tokio::test]
async fn test_requested_status() -> Result<(), anyhow::Error> {
    let server = EchoServer::spawn("authtest-http").await?;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/target/", server.url()))
        .header("Requested-Status", "401")
        .send()
        .await?;
    assert_eq!(response.status(), 401);

    let record = EchoRecord::from_json(&response.text().await?)?;
    assert_eq!(record.request.url.path, "/target/");

    Ok(())
}

/// A malformed `Requested-Status` is rejected rather than ignored.
#[tokio::test]
async fn test_malformed_requested_status_rejected() -> Result<(), anyhow::Error> {
    let server = EchoServer::spawn("authtest-http").await?;

    let response = reqwest::Client::new()
        .get(format!("{}/", server.url()))
        .header("Requested-Status", "soon")
        .send()
        .await?;
    assert_eq!(response.status(), 400);

    Ok(())
}

/// `Requested-Header` copies request headers onto the response.
#[tokio::test]
async fn test_requested_headers_reflected() -> Result<(), anyhow::Error> {
    let server = EchoServer::spawn("authtest-http").await?;

    let response = reqwest::Client::new()
        .get(format!("{}/", server.url()))
        .header("Requested-Header", "X-Foo, X-Bar")
        .header("X-Foo", "foo")
        .header("X-Bar", "bar")
        .send()
        .await?;

    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    assert_eq!(header("x-foo").as_deref(), Some("foo"));
    assert_eq!(header("x-bar").as_deref(), Some("bar"));
    assert_eq!(header("x-baz"), None);

    Ok(())
}

/// A WebSocket session echoes every message in order.
#[tokio::test]
async fn test_websocket_echo() -> Result<(), anyhow::Error> {
    let server = EchoServer::spawn("websocket-http").await?;

    let (mut socket, response) = connect_async(format!("ws://{}/ws/", server.authority())).await?;
    assert_eq!(response.status(), 101);

    for text in ["one", "two", "three"] {
        socket.send(Message::Text(text.to_string())).await?;
    }
    socket.send(Message::Binary(vec![1, 2, 3])).await?;

    let mut echoed = Vec::new();
    while echoed.len() < 4 {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => echoed.push(text),
            Some(Ok(Message::Binary(bytes))) => echoed.push(format!("{bytes:?}")),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => break,
        }
    }
    assert_eq!(echoed, vec!["one", "two", "three", "[1, 2, 3]"]);

    socket.close(None).await?;
    Ok(())
}
