//! Query transport.
//!
//! The scheduler never talks to the network directly; it hands each
//! [`Query`] to a [`Transport`] and receives either an [`Exchange`] or a
//! [`TransportError`]. HTTP error statuses are exchanges, not errors.

mod http;

pub use http::HttpTransport;

use crate::query::Query;
use common::headers::Headers;
use thiserror::Error;

/// A completed request/response (or WebSocket session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub status: u16,
    pub headers: Headers,
    pub body: Option<String>,
    /// Messages received over a WebSocket session, in order.
    pub messages: Vec<String>,
}

impl Exchange {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: None,
            messages: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }
}

/// Failure to obtain any response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("WebSocket session failed: {0}")]
    WebSocket(String),
}

impl TransportError {
    /// Connection-level failures are worth another attempt; everything
    /// else would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Connect(_))
    }
}

/// Executes queries against the deployment.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Execute one query. Timeouts are enforced by the caller.
    async fn execute(&self, query: &Query) -> Result<Exchange, TransportError>;
}

/// Mock transports for tests.
///
/// This module provides an in-memory transport that answers queries with a
/// caller-supplied function and records every query it sees.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    type Responder = dyn Fn(&Query) -> Result<Exchange, TransportError> + Send + Sync;

    /// A query as seen by the mock, with when it arrived and finished.
    #[derive(Debug, Clone)]
    pub struct Recorded {
        pub query: Query,
        pub started_at: Instant,
        pub finished_at: Instant,
    }

    /// Transport answering from a closure, optionally after a delay.
    pub struct MockTransport {
        responder: Arc<Responder>,
        delay: Duration,
        calls: AtomicUsize,
        recorded: Mutex<Vec<Recorded>>,
    }

    impl MockTransport {
        pub fn new<F>(responder: F) -> Self
        where
            F: Fn(&Query) -> Result<Exchange, TransportError> + Send + Sync + 'static,
        {
            Self {
                responder: Arc::new(responder),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                recorded: Mutex::new(Vec::new()),
            }
        }

        /// Answer every query with the given status and no body.
        pub fn with_status(status: u16) -> Self {
            Self::new(move |_| Ok(Exchange::new(status)))
        }

        /// Fail every query to connect.
        pub fn refusing() -> Self {
            Self::new(|_| Err(TransportError::Connect("connection refused".to_string())))
        }

        /// Sleep before answering each query.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Every query seen so far, in completion order.
        pub fn recorded(&self) -> Vec<Recorded> {
            self.recorded
                .lock()
                .map(|r| r.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn execute(&self, query: &Query) -> Result<Exchange, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let started_at = Instant::now();

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let response = (self.responder)(query);

            if let Ok(mut recorded) = self.recorded.lock() {
                recorded.push(Recorded {
                    query: query.clone(),
                    started_at,
                    finished_at: Instant::now(),
                });
            }
            response
        }
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used, clippy::expect_used)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_mock_with_status() {
            let mock = MockTransport::with_status(401);
            let exchange = mock.execute(&Query::new("http://plain/")).await.unwrap();
            assert_eq!(exchange.status, 401);
            assert_eq!(mock.call_count(), 1);
        }

        #[tokio::test]
        async fn test_mock_refusing_is_retryable() {
            let mock = MockTransport::refusing();
            let err = mock.execute(&Query::new("http://plain/")).await.unwrap_err();
            assert!(err.is_retryable());
        }

        #[tokio::test]
        async fn test_mock_records_queries() {
            let mock = MockTransport::new(|q| Ok(Exchange::new(200).with_body(q.url.clone())));
            mock.execute(&Query::new("http://plain/a/")).await.unwrap();
            mock.execute(&Query::new("http://plain/b/")).await.unwrap();

            let urls: Vec<String> = mock.recorded().into_iter().map(|r| r.query.url).collect();
            assert_eq!(urls, vec!["http://plain/a/", "http://plain/b/"]);
        }
    }
}
