//! Probe declarations.

use common::headers::Headers;
use std::time::Duration;

/// One probe to issue against the deployment.
///
/// Built with chained setters:
///
/// ```rust,ignore
/// Query::new(ctx.url("target/"))
///     .header("Requested-Status", "401")
///     .expected(401);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub url: String,
    pub method: String,
    pub headers: Headers,
    pub body: Option<String>,
    /// Messages to send over a WebSocket session; their echoes are collected.
    pub messages: Option<Vec<String>>,
    /// Expected status; `None` means any 2xx (or a completed WebSocket session).
    pub expected: Option<u16>,
    /// Execution barrier; every query of phase `k` resolves before phase `k+1` starts.
    pub phase: u32,
    /// Skip TLS certificate verification.
    pub insecure: bool,
    /// Log the full exchange at debug level.
    pub debug: bool,
    /// Reason this query is expected to fail.
    pub xfail: Option<String>,
    /// Overrides the harness-wide per-query timeout.
    pub timeout: Option<Duration>,
}

impl Query {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: Headers::new(),
            body: None,
            messages: None,
            expected: None,
            phase: 0,
            insecure: false,
            debug: false,
            xfail: None,
            timeout: None,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into().to_ascii_uppercase();
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn messages<I, S>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.messages = Some(messages.into_iter().map(Into::into).collect());
        self
    }

    pub fn expected(mut self, status: u16) -> Self {
        self.expected = Some(status);
        self
    }

    pub fn phase(mut self, phase: u32) -> Self {
        self.phase = phase;
        self
    }

    pub fn insecure(mut self) -> Self {
        self.insecure = true;
        self
    }

    pub fn debug(mut self) -> Self {
        self.debug = true;
        self
    }

    pub fn xfail(mut self, reason: impl Into<String>) -> Self {
        self.xfail = Some(reason.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether this query runs as a WebSocket session.
    pub fn is_websocket(&self) -> bool {
        self.url.starts_with("ws://") || self.url.starts_with("wss://")
    }

    /// Whether an observed status satisfies this query's expectation.
    pub fn status_matches(&self, status: u16) -> bool {
        match self.expected {
            Some(expected) => status == expected,
            None if self.is_websocket() => status == 101,
            None => (200..300).contains(&status),
        }
    }

    /// Human-readable form of the expectation, for reports.
    pub fn expectation(&self) -> String {
        match self.expected {
            Some(expected) => expected.to_string(),
            None if self.is_websocket() => "101".to_string(),
            None => "2xx".to_string(),
        }
    }
}

/// Something that must hold before phase 0 starts.
#[derive(Debug, Clone, PartialEq)]
pub enum Requirement {
    /// The query must succeed.
    Url(Query),
    /// The named pod must be ready.
    Pod(String),
}

impl Requirement {
    /// Short description for readiness logs and errors.
    pub fn describe(&self) -> String {
        match self {
            Requirement::Url(query) => format!("url {}", query.url),
            Requirement::Pod(name) => format!("pod {}", name),
        }
    }

    /// URL requirements whose scheme is not `scheme` are dropped.
    pub fn keeps_scheme(&self, scheme: &str) -> bool {
        match self {
            Requirement::Url(query) => query.url.starts_with(&format!("{}://", scheme)),
            Requirement::Pod(_) => true,
        }
    }
}
