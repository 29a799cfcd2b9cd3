//! Assertion helpers for node checks.
//!
//! A check returns `Result<(), CheckFailure>`; the helpers here build
//! failures carrying expected vs. observed detail, so `?` can be used to
//! stop at the first violation:
//!
//! ```rust,ignore
//! fn check(&self, ctx: &CheckContext<'_>) -> Result<(), CheckFailure> {
//!     let target = ctx.child_k8s("target")?;
//!     for (i, result) in ctx.results().iter().enumerate() {
//!         expect_eq("backend", Some(target.as_str()), result.backend_name()).at(i)?;
//!     }
//!     Ok(())
//! }
//! ```

use crate::result::QueryResult;
use std::collections::BTreeMap;
use std::fmt;

/// Absolute tolerance, in percentage points, for weighted-split checks.
pub const CANARY_TOLERANCE_PERCENT: f64 = 25.0;

/// One failed assertion.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// Query the assertion was about, if any.
    pub query_index: Option<usize>,
    pub message: String,
    pub expected: Option<String>,
    pub observed: Option<String>,
}

impl Violation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            query_index: None,
            message: message.into(),
            expected: None,
            observed: None,
        }
    }

    pub fn expected(mut self, expected: impl fmt::Debug) -> Self {
        self.expected = Some(format!("{expected:?}"));
        self
    }

    pub fn observed(mut self, observed: impl fmt::Debug) -> Self {
        self.observed = Some(format!("{observed:?}"));
        self
    }

    pub fn at(mut self, index: usize) -> Self {
        self.query_index = Some(index);
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(index) = self.query_index {
            write!(f, "[{index}] ")?;
        }
        write!(f, "{}", self.message)?;
        if let Some(expected) = &self.expected {
            write!(f, " (expected {expected}")?;
            match &self.observed {
                Some(observed) => write!(f, ", observed {observed})")?,
                None => write!(f, ")")?,
            }
        } else if let Some(observed) = &self.observed {
            write!(f, " (observed {observed})")?;
        }
        Ok(())
    }
}

/// Why a check did not pass.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckFailure {
    /// An assertion was violated.
    Violation(Violation),
    /// The check declared itself a known failure.
    ExpectedFailure { reason: String },
}

impl From<Violation> for CheckFailure {
    fn from(violation: Violation) -> Self {
        CheckFailure::Violation(violation)
    }
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckFailure::Violation(v) => write!(f, "{v}"),
            CheckFailure::ExpectedFailure { reason } => write!(f, "expected failure: {reason}"),
        }
    }
}

/// Attach a query index to a failed assertion.
pub trait AtQuery {
    fn at(self, index: usize) -> Self;
}

impl AtQuery for Result<(), CheckFailure> {
    fn at(self, index: usize) -> Self {
        self.map_err(|failure| match failure {
            CheckFailure::Violation(v) => CheckFailure::Violation(v.at(index)),
            other => other,
        })
    }
}

/// Declare the running check a known failure.
pub fn xfail(reason: impl Into<String>) -> Result<(), CheckFailure> {
    Err(CheckFailure::ExpectedFailure {
        reason: reason.into(),
    })
}

pub fn expect_true(condition: bool, message: impl Into<String>) -> Result<(), CheckFailure> {
    if condition {
        Ok(())
    } else {
        Err(Violation::new(message).into())
    }
}

pub fn expect_eq<E, O>(what: &str, expected: E, observed: O) -> Result<(), CheckFailure>
where
    E: fmt::Debug + PartialEq<O>,
    O: fmt::Debug,
{
    if expected == observed {
        Ok(())
    } else {
        Err(Violation::new(format!("{what} mismatch"))
            .expected(expected)
            .observed(observed)
            .into())
    }
}

/// `haystack` must contain `needle`.
pub fn expect_contains(what: &str, haystack: &str, needle: &str) -> Result<(), CheckFailure> {
    if haystack.contains(needle) {
        Ok(())
    } else {
        Err(Violation::new(format!("{what} does not contain {needle:?}"))
            .observed(haystack)
            .into())
    }
}

/// Response header `name` must have exactly `expected` as its values.
pub fn expect_header(result: &QueryResult, name: &str, expected: &[&str]) -> Result<(), CheckFailure> {
    let observed: Option<Vec<&str>> = result
        .headers
        .get(name)
        .map(|values| values.iter().map(String::as_str).collect());
    expect_eq(&format!("header {name}"), Some(expected.to_vec()), observed).at(result.index)
}

/// Response header `name` must be absent.
pub fn expect_absent(result: &QueryResult, name: &str) -> Result<(), CheckFailure> {
    match result.headers.get(name) {
        None => Ok(()),
        Some(values) => Err(Violation::new(format!("header {name} present"))
            .expected(None::<()>)
            .observed(values)
            .at(result.index)
            .into()),
    }
}

/// Header `name` on the request the echo backend received must be `expected`.
pub fn expect_request_header(result: &QueryResult, name: &str, expected: &[&str]) -> Result<(), CheckFailure> {
    let observed: Option<Vec<&str>> = result
        .backend
        .as_ref()
        .and_then(|b| b.request_header(name))
        .map(|values| values.iter().map(String::as_str).collect());
    expect_eq(&format!("backend request header {name}"), Some(expected.to_vec()), observed).at(result.index)
}

/// `observed` must lie within `tolerance` percentage points of `expected`.
pub fn expect_within_tolerance(what: &str, expected: f64, observed: f64, tolerance: f64) -> Result<(), CheckFailure> {
    if (expected - observed).abs() <= tolerance {
        Ok(())
    } else {
        Err(Violation::new(format!("{what} outside ±{tolerance} points"))
            .expected(expected)
            .observed(observed)
            .into())
    }
}

/// How many results each backend handled. Results without a backend record
/// count under the empty name.
pub fn backend_histogram(results: &[QueryResult]) -> BTreeMap<String, usize> {
    let mut histogram = BTreeMap::new();
    for result in results {
        let name = result.backend_name().unwrap_or_default().to_string();
        *histogram.entry(name).or_insert(0) += 1;
    }
    histogram
}

/// Percentage of all results handled by `backend`.
#[allow(clippy::cast_precision_loss)]
pub fn canary_percentage(results: &[QueryResult], backend: &str) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let hits = results
        .iter()
        .filter(|r| r.backend_name() == Some(backend))
        .count();
    100.0 * hits as f64 / results.len() as f64
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use crate::query::Query;
    use crate::transport::Exchange;
    use std::time::Instant;

    fn result(index: usize, backend: Option<&str>) -> QueryResult {
        let mut exchange = Exchange::new(200).with_header("Server", "envoy");
        if let Some(name) = backend {
            exchange = exchange.with_body(format!(
                r#"{{"backend": "{name}", "request": {{"method": "GET", "url": {{"path": "/"}}, "headers": {{"X-Foo": ["foo"]}}, "host": "h"}}}}"#
            ));
        }
        QueryResult::completed(NodeId(1), index, Query::new("http://plain/"), exchange, 1, Instant::now())
    }

    #[test]
    fn test_expect_eq_reports_both_sides() {
        let err = expect_eq("status", 401, 200).at(3).unwrap_err();
        match err {
            CheckFailure::Violation(v) => {
                assert_eq!(v.query_index, Some(3));
                assert_eq!(v.expected.as_deref(), Some("401"));
                assert_eq!(v.observed.as_deref(), Some("200"));
                assert_eq!(v.to_string(), "[3] status mismatch (expected 401, observed 200)");
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[test]
    fn test_header_helpers() {
        let r = result(2, Some("target"));
        expect_header(&r, "server", &["envoy"]).unwrap();
        expect_absent(&r, "access-control-allow-origin").unwrap();
        assert!(expect_absent(&r, "Server").is_err());
        expect_request_header(&r, "x-foo", &["foo"]).unwrap();

        let err = expect_header(&r, "Server", &["nginx"]).unwrap_err();
        assert!(err.to_string().starts_with("[2] header Server mismatch"));
    }

    #[test]
    fn test_expect_contains() {
        expect_contains("body", "no healthy upstream", "healthy").unwrap();
        assert!(expect_contains("body", "ok", "healthy").is_err());
    }

    #[test]
    fn test_canary_percentage_and_histogram() {
        let mut results: Vec<QueryResult> = (0..70).map(|i| result(i, Some("target"))).collect();
        results.extend((70..100).map(|i| result(i, Some("canary"))));

        assert!((canary_percentage(&results, "canary") - 30.0).abs() < f64::EPSILON);
        let histogram = backend_histogram(&results);
        assert_eq!(histogram.get("target"), Some(&70));
        assert_eq!(histogram.get("canary"), Some(&30));
        assert_eq!(canary_percentage(&[], "canary"), 0.0);
    }

    #[test]
    fn test_tolerance_bounds_are_inclusive() {
        expect_within_tolerance("canary", 50.0, 25.0, CANARY_TOLERANCE_PERCENT).unwrap();
        expect_within_tolerance("canary", 50.0, 75.0, CANARY_TOLERANCE_PERCENT).unwrap();
        assert!(expect_within_tolerance("canary", 50.0, 24.0, CANARY_TOLERANCE_PERCENT).is_err());
        assert!(expect_within_tolerance("canary", 10.0, 36.0, CANARY_TOLERANCE_PERCENT).is_err());
    }

    #[test]
    fn test_xfail_is_not_a_violation() {
        let failure = xfail("rewrite option is broken").unwrap_err();
        assert_eq!(
            failure,
            CheckFailure::ExpectedFailure {
                reason: "rewrite option is broken".to_string()
            }
        );
    }
}
