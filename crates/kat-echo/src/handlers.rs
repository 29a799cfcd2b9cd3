//! Echo handler.
//!
//! Answers with an [`EchoRecord`] of the received request, honoring the
//! `Requested-Status` and `Requested-Header` conventions, or upgrades to a
//! WebSocket session that echoes every message.

use crate::routes::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use common::echo::{self, EchoRecord, EchoRequest, EchoResponse, EchoUrl, TlsState};
use common::headers::Headers;
use std::sync::Arc;
use tracing::{debug, warn};

/// Echo every request back to its sender.
pub async fn echo(
    State(state): State<Arc<AppState>>,
    ws: Option<WebSocketUpgrade>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Some(ws) = ws {
        debug!(path = %uri.path(), "Upgrading to WebSocket echo session");
        return ws.on_upgrade(echo_socket);
    }

    let received = collect_headers(&headers);

    let status = match echo::requested_status(&received) {
        Ok(Some(code)) => StatusCode::from_u16(code).unwrap_or(StatusCode::OK),
        Ok(None) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "Rejecting request with malformed requested status");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let record = build_record(&state.config.backend_name, &method, &uri, received);

    let mut response_headers = HeaderMap::new();
    for (name, values) in record.response.headers.iter() {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                response_headers.append(name.clone(), value);
            }
        }
    }
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    match record.to_json() {
        Ok(body) => (status, response_headers, body).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize echo record");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Build the echo record for a request.
///
/// Headers named by `Requested-Header` are copied into the record's
/// response section; the handler emits them as real response headers.
pub fn build_record(backend: &str, method: &Method, uri: &Uri, received: Headers) -> EchoRecord {
    let mut reflected = Headers::new();
    for name in echo::requested_headers(&received) {
        if let Some(values) = received.get(&name) {
            for value in values {
                reflected.append(&name, value.clone());
            }
        }
    }

    let host = received
        .first("host")
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .unwrap_or_default();

    EchoRecord {
        backend: backend.to_string(),
        request: EchoRequest {
            method: method.to_string(),
            url: EchoUrl {
                path: uri.path().to_string(),
                query: uri.query().map(str::to_string),
            },
            headers: received,
            host,
            tls: TlsState { enabled: false },
        },
        response: EchoResponse { headers: reflected },
    }
}

fn collect_headers(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

async fn echo_socket(mut socket: WebSocket) {
    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "WebSocket echo session ended with error");
                return;
            }
        };

        match message {
            Message::Text(_) | Message::Binary(_) => {
                if socket.send(message).await.is_err() {
                    return;
                }
            }
            Message::Close(_) => return,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_build_record_reflects_requested_headers() {
        let received: Headers = [
            ("Host", "authtest"),
            ("Requested-Header", "Location"),
            ("Location", "foo"),
            ("X-Bar", "bar"),
        ]
        .into_iter()
        .collect();
        let uri: Uri = "/target/?x=1".parse().unwrap();

        let record = build_record("authtest-http", &Method::GET, &uri, received);

        assert_eq!(record.backend, "authtest-http");
        assert_eq!(record.request.url.path, "/target/");
        assert_eq!(record.request.url.query.as_deref(), Some("x=1"));
        assert_eq!(record.request.host, "authtest");
        assert_eq!(record.response.headers.first("location"), Some("foo"));
        assert!(!record.response.headers.contains("x-bar"));
    }

    #[test]
    fn test_build_record_host_falls_back_to_authority() {
        let uri: Uri = "http://inspector.internal/".parse().unwrap();
        let record = build_record("b", &Method::GET, &uri, Headers::new());
        assert_eq!(record.request.host, "inspector.internal");
    }
}
