//! HTTP and WebSocket transport.

use super::{Exchange, Transport, TransportError};
use crate::errors::HarnessError;
use crate::query::Query;
use common::headers::Headers;
use futures::{SinkExt, StreamExt};
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::error;

/// Connect timeout for probe requests in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Transport over real HTTP(S) and WebSocket connections.
///
/// Redirects are never followed: a redirect is an observable response the
/// query may be asserting on.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    /// Same as `client` but skips certificate verification.
    insecure_client: Client,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns `HarnessError::Transport` if an HTTP client cannot be built.
    pub fn new() -> Result<Self, HarnessError> {
        Ok(Self {
            client: build_client(false)?,
            insecure_client: build_client(true)?,
        })
    }

    async fn execute_http(&self, query: &Query) -> Result<Exchange, TransportError> {
        let method = Method::from_bytes(query.method.as_bytes())
            .map_err(|_| TransportError::InvalidQuery(format!("invalid method '{}'", query.method)))?;

        let client = if query.insecure {
            &self.insecure_client
        } else {
            &self.client
        };

        let mut request = client.request(method, &query.url);
        for (name, values) in query.headers.iter() {
            for value in values {
                request = request.header(name, value.as_str());
            }
        }
        if let Some(body) = &query.body {
            request = request.body(body.clone());
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status().as_u16();

        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }

        // A switching-protocols response has no body to read.
        if status == 101 {
            return Ok(Exchange {
                status,
                headers,
                body: None,
                messages: Vec::new(),
            });
        }

        let body = response.text().await.map_err(classify)?;
        Ok(Exchange {
            status,
            headers,
            body: (!body.is_empty()).then_some(body),
            messages: Vec::new(),
        })
    }

    async fn execute_websocket(&self, query: &Query) -> Result<Exchange, TransportError> {
        let mut request = query
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidQuery(e.to_string()))?;

        for (name, values) in query.headers.iter() {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidQuery(e.to_string()))?;
            for value in values {
                let value = HeaderValue::from_str(value)
                    .map_err(|e| TransportError::InvalidQuery(e.to_string()))?;
                request.headers_mut().append(header.clone(), value);
            }
        }

        let (mut stream, response) = match tokio_tungstenite::connect_async(request).await {
            Ok(connected) => connected,
            // The handshake was refused with an ordinary HTTP response.
            Err(WsError::Http(response)) => {
                let mut exchange = Exchange::new(response.status().as_u16());
                for (name, value) in response.headers() {
                    exchange
                        .headers
                        .append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
                }
                exchange.body = response
                    .body()
                    .as_ref()
                    .map(|b| String::from_utf8_lossy(b).into_owned());
                return Ok(exchange);
            }
            Err(WsError::Io(e)) => return Err(TransportError::Connect(e.to_string())),
            Err(e) => return Err(TransportError::WebSocket(e.to_string())),
        };

        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }

        let outgoing = query.messages.clone().unwrap_or_default();
        for message in &outgoing {
            stream
                .send(Message::Text(message.clone()))
                .await
                .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        }

        let mut messages = Vec::with_capacity(outgoing.len());
        while messages.len() < outgoing.len() {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => messages.push(text),
                Some(Ok(Message::Binary(bytes))) => {
                    messages.push(String::from_utf8_lossy(&bytes).into_owned());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(TransportError::WebSocket(e.to_string())),
            }
        }

        // Best effort; the session outcome is already known.
        let _ = stream.close(None).await;

        Ok(Exchange {
            status: response.status().as_u16(),
            headers,
            body: None,
            messages,
        })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, query: &Query) -> Result<Exchange, TransportError> {
        if query.is_websocket() {
            self.execute_websocket(query).await
        } else {
            self.execute_http(query).await
        }
    }
}

fn build_client(insecure: bool) -> Result<Client, HarnessError> {
    Client::builder()
        .redirect(Policy::none())
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .danger_accept_invalid_certs(insecure)
        .build()
        .map_err(|e| {
            error!(target: "kat.transport", error = %e, "Failed to build HTTP client");
            HarnessError::Transport(e.to_string())
        })
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_builder() {
        TransportError::InvalidQuery(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/target/"))
            .and(header("x-foo", "foo"))
            .respond_with(
                ResponseTemplate::new(401)
                    .insert_header("Server", "envoy")
                    .set_body_string("denied"),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let query = Query::new(format!("{}/target/", server.uri())).header("X-Foo", "foo");
        let exchange = transport.execute(&query).await.unwrap();

        assert_eq!(exchange.status, 401);
        assert_eq!(exchange.headers.first("server"), Some("envoy"));
        assert_eq!(exchange.body.as_deref(), Some("denied"));
    }

    #[tokio::test]
    async fn test_redirects_are_not_followed() {
        let server = MockServer::start().await;
        Mock::given(path("/tls-target/"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "https://elsewhere/"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let exchange = transport
            .execute(&Query::new(format!("{}/tls-target/", server.uri())))
            .await
            .unwrap();

        assert_eq!(exchange.status, 301);
        assert_eq!(exchange.headers.first("location"), Some("https://elsewhere/"));
        assert!(exchange.body.is_none());
    }

    #[tokio::test]
    async fn test_post_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let query = Query::new(server.uri()).method("post").body("{}");
        assert_eq!(transport.execute(&query).await.unwrap().status, 200);
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .execute(&Query::new(format!("http://{addr}/")))
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn test_invalid_method() {
        let transport = HttpTransport::new().unwrap();
        let err = transport
            .execute(&Query::new("http://127.0.0.1:1/").method("BAD METHOD"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidQuery(_)));
    }
}
