//! Query outcomes.
//!
//! Every dispatched query produces exactly one [`QueryResult`], whether it
//! succeeded, returned an error status, failed in transport, or timed out.

use crate::node::NodeId;
use crate::query::Query;
use crate::transport::Exchange;
use common::echo::{EchoRecord, EchoRequest, RAW_BACKEND};
use common::headers::Headers;
use serde_json::Value;
use std::time::{Duration, Instant};

/// Which downstream target handled a request, as reported by the body.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRecord {
    /// Echo backend name, or `raw` for JSON that is not an echo record.
    pub name: String,
    /// The request as the echo backend received it.
    pub request: Option<EchoRequest>,
    /// Headers the echo backend was asked to emit.
    pub response_headers: Headers,
    /// Parsed body of a non-echo JSON response.
    pub raw: Option<Value>,
}

impl BackendRecord {
    /// Interpret a response body. Non-JSON bodies have no backend record.
    pub fn from_body(body: &str) -> Option<Self> {
        if let Ok(record) = EchoRecord::from_json(body) {
            return Some(Self {
                name: record.backend,
                request: Some(record.request),
                response_headers: record.response.headers,
                raw: None,
            });
        }

        serde_json::from_str::<Value>(body).ok().map(|raw| Self {
            name: RAW_BACKEND.to_string(),
            request: None,
            response_headers: Headers::new(),
            raw: Some(raw),
        })
    }

    pub fn request_path(&self) -> Option<&str> {
        self.request.as_ref().map(|r| r.url.path.as_str())
    }

    /// Values of a header on the echoed request (case-insensitive).
    pub fn request_header(&self, name: &str) -> Option<&[String]> {
        self.request.as_ref().and_then(|r| r.headers.get(name))
    }

    pub fn request_host(&self) -> Option<&str> {
        self.request.as_ref().map(|r| r.host.as_str())
    }

    pub fn tls_enabled(&self) -> bool {
        self.request.as_ref().is_some_and(|r| r.tls.enabled)
    }
}

/// Outcome of one query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Node that declared the query.
    pub node: NodeId,
    /// Position of the query in the node's declaration order.
    pub index: usize,
    /// The query as dispatched (after parent decoration).
    pub query: Query,
    /// Final status; `None` when no response arrived.
    pub status: Option<u16>,
    pub headers: Headers,
    pub body: Option<String>,
    pub backend: Option<BackendRecord>,
    /// WebSocket messages received, in order.
    pub messages: Vec<String>,
    /// Transport failure or timeout description.
    pub error: Option<String>,
    pub attempts: u32,
    pub dispatched_at: Instant,
    pub completed_at: Instant,
}

impl QueryResult {
    pub fn completed(
        node: NodeId,
        index: usize,
        query: Query,
        exchange: Exchange,
        attempts: u32,
        dispatched_at: Instant,
    ) -> Self {
        let backend = exchange.body.as_deref().and_then(BackendRecord::from_body);
        Self {
            node,
            index,
            query,
            status: Some(exchange.status),
            headers: exchange.headers,
            body: exchange.body,
            backend,
            messages: exchange.messages,
            error: None,
            attempts,
            dispatched_at,
            completed_at: Instant::now(),
        }
    }

    pub fn failed(
        node: NodeId,
        index: usize,
        query: Query,
        error: impl Into<String>,
        attempts: u32,
        dispatched_at: Instant,
    ) -> Self {
        Self {
            node,
            index,
            query,
            status: None,
            headers: Headers::new(),
            body: None,
            backend: None,
            messages: Vec::new(),
            error: Some(error.into()),
            attempts,
            dispatched_at,
            completed_at: Instant::now(),
        }
    }

    pub fn phase(&self) -> u32 {
        self.query.phase
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Whether the observed status satisfies the query's expectation.
    pub fn status_ok(&self) -> bool {
        self.status.is_some_and(|s| self.query.status_matches(s))
    }

    pub fn backend_name(&self) -> Option<&str> {
        self.backend.as_ref().map(|b| b.name.as_str())
    }

    pub fn elapsed(&self) -> Duration {
        self.completed_at.saturating_duration_since(self.dispatched_at)
    }
}
