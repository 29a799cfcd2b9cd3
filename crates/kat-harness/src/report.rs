//! Run reports.

use crate::assertions::Violation;
use crate::node::NodeRole;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use uuid::Uuid;

/// Maximum length of a response excerpt quoted in a report.
const MAX_EXCERPT_LEN: usize = 256;

/// JWT tokens (header.payload.signature).
#[allow(clippy::expect_used)]
static JWT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]*)?").expect("valid JWT pattern")
});

/// Bearer credentials, token or JWT.
#[allow(clippy::expect_used)]
static BEARER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+").expect("valid bearer pattern")
});

/// Redact credentials from text quoted in reports and logs, and truncate it.
///
/// Bearer credentials are replaced first so `Bearer <JWT>` is redacted as a
/// whole.
pub fn sanitize(text: &str) -> String {
    let sanitized = BEARER_PATTERN.replace_all(text, "[BEARER_REDACTED]");
    let sanitized = JWT_PATTERN.replace_all(&sanitized, "[JWT_REDACTED]");

    if sanitized.len() > MAX_EXCERPT_LEN {
        let mut end = MAX_EXCERPT_LEN;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...[truncated]", sanitized.get(..end).unwrap_or_default())
    } else {
        sanitized.into_owned()
    }
}

/// Verdict for one node.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Passed,
    Failed,
    /// Failed, but the node or query declared the failure.
    ExpectedFailure { reason: String },
    /// Passed despite being declared a known failure. Not a failure.
    UnexpectedPass { reason: String },
    /// The node's deployment never became usable.
    DeploymentFailed { error: String },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed | Outcome::DeploymentFailed { .. })
    }

    fn tag(&self) -> &'static str {
        match self {
            Outcome::Passed => "PASS",
            Outcome::Failed => "FAIL",
            Outcome::ExpectedFailure { .. } => "XFAIL",
            Outcome::UnexpectedPass { .. } => "XPASS",
            Outcome::DeploymentFailed { .. } => "DEPLOY",
        }
    }
}

/// Verdict and evidence for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReport {
    /// Dot-joined node path, e.g. `plain.simplemapping-http`.
    pub name: String,
    pub role: NodeRole,
    pub outcome: Outcome,
    /// Every violation found, implicit status checks first.
    pub violations: Vec<Violation>,
}

/// Everything that happened to one root's deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct RootReport {
    pub root: String,
    /// Queries dispatched for this root.
    pub queries: usize,
    /// Nodes in pre-order. A failed deployment has a single entry for the root.
    pub nodes: Vec<NodeReport>,
}

impl RootReport {
    pub fn deployment_failed(root: impl Into<String>, error: impl fmt::Display) -> Self {
        let root = root.into();
        Self {
            nodes: vec![NodeReport {
                name: root.clone(),
                role: NodeRole::Gateway,
                outcome: Outcome::DeploymentFailed {
                    error: sanitize(&error.to_string()),
                },
                violations: Vec::new(),
            }],
            root,
            queries: 0,
        }
    }
}

/// Outcome tallies across a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub passed: usize,
    pub failed: usize,
    pub expected_failures: usize,
    pub unexpected_passes: usize,
    pub deployment_failures: usize,
}

/// Result of a whole run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub roots: Vec<RootReport>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, roots: Vec<RootReport>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            roots,
        }
    }

    /// Every node report, root by root.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeReport> {
        self.roots.iter().flat_map(|r| r.nodes.iter())
    }

    /// Report for the node with dot-joined path `name`.
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes().find(|n| n.name == name)
    }

    /// False only if some node failed or some deployment failed; expected
    /// failures and unexpected passes do not count.
    pub fn is_success(&self) -> bool {
        !self.nodes().any(|n| n.outcome.is_failure())
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for node in self.nodes() {
            match node.outcome {
                Outcome::Passed => counts.passed += 1,
                Outcome::Failed => counts.failed += 1,
                Outcome::ExpectedFailure { .. } => counts.expected_failures += 1,
                Outcome::UnexpectedPass { .. } => counts.unexpected_passes += 1,
                Outcome::DeploymentFailed { .. } => counts.deployment_failures += 1,
            }
        }
        counts
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = self.counts();
        let elapsed = self.finished_at - self.started_at;
        writeln!(
            f,
            "KAT run {} ({} roots, {}.{:03}s): {} passed, {} failed, {} xfailed, {} xpassed, {} deployment failures",
            self.run_id,
            self.roots.len(),
            elapsed.num_seconds(),
            elapsed.num_milliseconds().rem_euclid(1000),
            counts.passed,
            counts.failed,
            counts.expected_failures,
            counts.unexpected_passes,
            counts.deployment_failures,
        )?;

        for node in self.nodes() {
            match &node.outcome {
                Outcome::Passed => continue,
                Outcome::Failed => writeln!(f, "  {} {}", node.outcome.tag(), node.name)?,
                Outcome::ExpectedFailure { reason } | Outcome::UnexpectedPass { reason } => {
                    writeln!(f, "  {} {}: {}", node.outcome.tag(), node.name, reason)?
                }
                Outcome::DeploymentFailed { error } => {
                    writeln!(f, "  {} {}: {}", node.outcome.tag(), node.name, error)?
                }
            }
            for violation in &node.violations {
                writeln!(f, "      {violation}")?;
            }
        }
        Ok(())
    }
}
