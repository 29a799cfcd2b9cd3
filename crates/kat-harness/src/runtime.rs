//! Assertion runtime.
//!
//! Once every phase has drained, nodes are checked in post-order so
//! children settle before their parents. Each node gets an implicit status
//! check over its own results, then its own `check`. Expected-failure
//! declarations on the node, the check, or individual queries downgrade
//! failures; an xfail node that passes is an unexpected pass.

use crate::assertions::{self, CheckFailure, Violation};
use crate::correlator::{ResultStore, ResultView};
use crate::deploy::Environment;
use crate::node::{NodeContext, NodeId, NodeTree};
use crate::report::{sanitize, NodeReport, Outcome};
use crate::result::QueryResult;
use std::collections::BTreeMap;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Everything a node's check can see.
///
/// Dereferences to the node's [`NodeContext`], so `ctx.param("weight")` and
/// `ctx.child("target")` work directly.
#[derive(Clone, Copy)]
pub struct CheckContext<'a> {
    node: NodeContext<'a>,
    results: ResultView<'a>,
    tolerance: f64,
}

impl<'a> CheckContext<'a> {
    pub fn new(node: NodeContext<'a>, results: ResultView<'a>, tolerance: f64) -> Self {
        Self {
            node,
            results,
            tolerance,
        }
    }

    pub fn node(&self) -> NodeContext<'a> {
        self.node
    }

    /// This node's results, positionally aligned with its queries.
    pub fn results(&self) -> ResultView<'a> {
        self.results
    }

    /// The parent's results, or an empty slice for a root.
    pub fn parent_results(&self) -> &'a [QueryResult] {
        self.results.parent().map(|v| v.results()).unwrap_or_default()
    }

    /// Results of the child with `label`.
    pub fn child_results(&self, label: &str) -> Option<&'a [QueryResult]> {
        self.results.child(label).map(|v| v.results())
    }

    /// Kubernetes name of the child with `label`, which is also the name its
    /// echo backend reports.
    pub fn child_k8s(&self, label: &str) -> Result<String, CheckFailure> {
        self.node
            .child(label)
            .map(|c| c.path().k8s())
            .ok_or_else(|| Violation::new(format!("node has no child labelled '{label}'")).into())
    }

    /// Absolute tolerance in percentage points for weighted-split checks.
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Share of `results` served by `backend` must be within the configured
    /// tolerance of `weight` percent.
    pub fn expect_split(&self, results: &[QueryResult], backend: &str, weight: f64) -> Result<(), CheckFailure> {
        let observed = assertions::canary_percentage(results, backend);
        debug!(
            target: "kat.runtime",
            node = %self.node.path().fqdn(),
            backend = %backend,
            weight,
            observed,
            "Weighted split"
        );
        assertions::expect_within_tolerance(&format!("share of {backend}"), weight, observed, self.tolerance)
    }
}

impl<'a> Deref for CheckContext<'a> {
    type Target = NodeContext<'a>;

    fn deref(&self) -> &Self::Target {
        &self.node
    }
}

/// Check every node of `tree`, children before parents.
///
/// Reports come back in tree pre-order.
pub fn check_tree(tree: &NodeTree, env: &Environment, store: &ResultStore, tolerance: f64) -> Vec<NodeReport> {
    let mut reports = BTreeMap::new();

    for id in tree.post_order() {
        let Some(node) = tree.context(id, env) else {
            continue;
        };
        let ctx = CheckContext::new(node, ResultView::new(store, tree, id), tolerance);
        let report = check_node(&ctx);

        match &report.outcome {
            Outcome::Failed => warn!(
                target: "kat.runtime",
                node = %report.name,
                violations = report.violations.len(),
                "Node failed"
            ),
            outcome => debug!(target: "kat.runtime", node = %report.name, outcome = ?outcome, "Node checked"),
        }
        reports.insert(id, report);
    }

    reports.into_values().collect()
}

/// Implicit status verdicts over one node's results.
#[derive(Default)]
struct StatusVerdicts {
    violations: Vec<Violation>,
    /// Reasons of xfail queries that failed as declared.
    expected: Vec<String>,
    /// Reasons of xfail queries that passed anyway.
    unexpected: Vec<String>,
}

fn status_verdicts(results: &[QueryResult]) -> StatusVerdicts {
    let mut verdicts = StatusVerdicts::default();

    for result in results {
        let violation = status_violation(result);
        match (&result.query.xfail, violation) {
            (None, Some(v)) => verdicts.violations.push(v),
            (None, None) => {}
            (Some(reason), Some(_)) => verdicts.expected.push(reason.clone()),
            (Some(reason), None) => verdicts.unexpected.push(reason.clone()),
        }
    }
    verdicts
}

fn status_violation(result: &QueryResult) -> Option<Violation> {
    let expected = result.query.expectation();

    if let Some(error) = &result.error {
        return Some(
            Violation::new(format!("{} {} failed: {}", result.query.method, result.query.url, error))
                .expected(expected)
                .at(result.index),
        );
    }

    match result.status {
        Some(status) if result.query.status_matches(status) => None,
        status => {
            let mut message = format!("unexpected status from {} {}", result.query.method, result.query.url);
            if let Some(body) = result.body.as_deref().filter(|b| !b.is_empty()) {
                message.push_str(&format!("; body: {}", sanitize(body)));
            }
            Some(
                Violation::new(message)
                    .expected(expected)
                    .observed(status)
                    .at(result.index),
            )
        }
    }
}

/// Run a node's own check, turning a panic into a violation.
fn run_check(ctx: &CheckContext<'_>) -> Result<(), CheckFailure> {
    let behavior = ctx.node().node().behavior();
    match panic::catch_unwind(AssertUnwindSafe(|| behavior.check(ctx))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "check panicked".to_string());
            Err(Violation::new(format!("check panicked: {}", sanitize(&message))).into())
        }
    }
}

fn check_node(ctx: &CheckContext<'_>) -> NodeReport {
    let node = ctx.node();
    let StatusVerdicts {
        mut violations,
        expected,
        unexpected,
    } = status_verdicts(ctx.results().results());

    let mut declared = None;
    match run_check(ctx) {
        Ok(()) => {}
        Err(CheckFailure::Violation(v)) => violations.push(v),
        Err(CheckFailure::ExpectedFailure { reason }) => declared = Some(reason),
    }
    let node_xfail = node.node().behavior().xfail(&node);
    // An xfail query marks the whole node as known broken.
    let query_xfail = ctx.results().iter().find_map(|r| r.query.xfail.clone());

    let outcome = if let Some(reason) = declared {
        Outcome::ExpectedFailure { reason }
    } else if !violations.is_empty() {
        match node_xfail.as_ref().or(query_xfail.as_ref()) {
            Some(reason) => Outcome::ExpectedFailure { reason: reason.clone() },
            None => Outcome::Failed,
        }
    } else if let Some(reason) = node_xfail {
        Outcome::UnexpectedPass { reason }
    } else if let Some(reason) = expected.into_iter().next() {
        Outcome::ExpectedFailure { reason }
    } else if let Some(reason) = unexpected.into_iter().next() {
        Outcome::UnexpectedPass { reason }
    } else {
        Outcome::Passed
    };

    NodeReport {
        name: node.path().fqdn(),
        role: node.role(),
        outcome,
        violations,
    }
}
