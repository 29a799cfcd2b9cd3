//! Phased query scheduling.
//!
//! Every node's queries are collected in tree order and partitioned by
//! phase. Phase `k` is dispatched concurrently (bounded by a semaphore) and
//! fully drained before any query of phase `k+1` starts. Every planned query
//! yields exactly one [`QueryResult`]: transport errors, timeouts and phase
//! aborts all become failed results instead of escaping the scheduler.

use crate::config::HarnessConfig;
use crate::deploy::Environment;
use crate::node::{NodeId, NodeTree};
use crate::query::{Query, Requirement};
use crate::result::QueryResult;
use crate::transport::Transport;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Pause before retrying a connection-level failure.
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// A query tagged with the node that declared it and its position.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedQuery {
    pub node: NodeId,
    /// Position within the declaring node's queries.
    pub index: usize,
    pub query: Query,
}

/// Collect every node's queries in pre-order.
///
/// Each child may decorate its parent's queries (e.g. mark them xfail)
/// before they are planned.
pub fn collect_queries(tree: &NodeTree, env: &Environment) -> Vec<PlannedQuery> {
    let mut planned = Vec::new();

    for node in tree.iter() {
        let Some(ctx) = tree.context(node.id(), env) else {
            continue;
        };
        let mut queries = node.behavior().queries(&ctx);

        for child in ctx.children() {
            for query in &mut queries {
                child.node().behavior().decorate_parent_query(&child, query);
            }
        }

        planned.extend(queries.into_iter().enumerate().map(|(index, query)| PlannedQuery {
            node: node.id(),
            index,
            query,
        }));
    }
    planned
}

/// Collect every node's readiness requirements in pre-order.
///
/// Nodes filter their own lists, e.g. with [`Requirement::keeps_scheme`].
pub fn collect_requirements(tree: &NodeTree, env: &Environment) -> Vec<Requirement> {
    tree.iter()
        .filter_map(|node| tree.context(node.id(), env))
        .flat_map(|ctx| ctx.node().behavior().requirements(&ctx))
        .collect()
}

/// Dispatches planned queries phase by phase.
#[derive(Clone)]
pub struct Scheduler {
    transport: Arc<dyn Transport>,
    concurrency: usize,
    query_timeout: Duration,
    phase_timeout: Duration,
    retries: u32,
}

impl Scheduler {
    pub fn new(transport: Arc<dyn Transport>, config: &HarnessConfig) -> Self {
        Self {
            transport,
            concurrency: config.concurrency.max(1),
            query_timeout: config.query_timeout,
            phase_timeout: config.phase_timeout,
            retries: config.query_retries,
        }
    }

    /// Run every planned query, returning one result per query.
    pub async fn run(&self, root: &str, planned: Vec<PlannedQuery>) -> Vec<QueryResult> {
        let mut phases: BTreeMap<u32, Vec<PlannedQuery>> = BTreeMap::new();
        for query in planned {
            phases.entry(query.query.phase).or_default().push(query);
        }

        let mut results = Vec::new();
        for (phase, queries) in phases {
            info!(
                target: "kat.scheduler",
                root = %root,
                phase,
                queries = queries.len(),
                "Dispatching phase"
            );
            let phase_results = self.run_phase(phase, queries).await;
            let failed = phase_results.iter().filter(|r| r.is_error()).count();
            info!(
                target: "kat.scheduler",
                root = %root,
                phase,
                failed,
                "Phase drained"
            );
            results.extend(phase_results);
        }
        results
    }

    async fn run_phase(&self, phase: u32, queries: Vec<PlannedQuery>) -> Vec<QueryResult> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let phase_started = Instant::now();
        let mut pending: BTreeMap<(NodeId, usize), Query> = BTreeMap::new();
        let mut set = JoinSet::new();

        for planned in queries {
            pending.insert((planned.node, planned.index), planned.query.clone());

            let transport = Arc::clone(&self.transport);
            let semaphore = Arc::clone(&semaphore);
            let timeout = planned.query.timeout.unwrap_or(self.query_timeout);
            let retries = self.retries;

            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                dispatch(transport.as_ref(), planned, timeout, retries).await
            });
        }

        let deadline = tokio::time::Instant::now() + self.phase_timeout;
        let mut results = Vec::with_capacity(pending.len());
        let mut reason = "query task did not complete".to_string();

        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok(result))) => {
                    pending.remove(&(result.node, result.index));
                    results.push(result);
                }
                Ok(Some(Err(e))) => {
                    warn!(target: "kat.scheduler", phase, error = %e, "Query task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        target: "kat.scheduler",
                        phase,
                        in_flight = pending.len(),
                        "Phase timed out, aborting in-flight queries"
                    );
                    reason = format!("phase {} timed out after {}s", phase, self.phase_timeout.as_secs());
                    set.abort_all();
                    // Aborted tasks must be gone before the next phase starts.
                    while set.join_next().await.is_some() {}
                    break;
                }
            }
        }

        for ((node, index), query) in pending {
            results.push(QueryResult::failed(node, index, query, reason.clone(), 0, phase_started));
        }
        results
    }
}

async fn dispatch(transport: &dyn Transport, planned: PlannedQuery, timeout: Duration, retries: u32) -> QueryResult {
    let PlannedQuery { node, index, query } = planned;
    let dispatched_at = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;
        match tokio::time::timeout(timeout, transport.execute(&query)).await {
            Ok(Ok(exchange)) => {
                if query.debug {
                    debug!(
                        target: "kat.scheduler",
                        url = %query.url,
                        method = %query.method,
                        request_headers = ?query.headers,
                        status = exchange.status,
                        response_headers = ?exchange.headers,
                        body = ?exchange.body,
                        messages = ?exchange.messages,
                        "Query exchange"
                    );
                }
                return QueryResult::completed(node, index, query, exchange, attempts, dispatched_at);
            }
            Ok(Err(e)) if e.is_retryable() && attempts <= retries => {
                debug!(target: "kat.scheduler", url = %query.url, attempt = attempts, error = %e, "Retrying query");
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Ok(Err(e)) => {
                debug!(target: "kat.scheduler", url = %query.url, error = %e, "Query failed");
                return QueryResult::failed(node, index, query, e.to_string(), attempts, dispatched_at);
            }
            Err(_) => {
                debug!(target: "kat.scheduler", url = %query.url, "Query timed out");
                let reason = format!("timed out after {}ms", timeout.as_millis());
                return QueryResult::failed(node, index, query, reason, attempts, dispatched_at);
            }
        }
    }
}
