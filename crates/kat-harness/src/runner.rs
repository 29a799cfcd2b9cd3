//! Top-level pipeline.

use crate::aggregate;
use crate::builder;
use crate::config::HarnessConfig;
use crate::correlator::ResultStore;
use crate::deploy::{wait_until_ready, DeploymentDriver, Environment, StaticDriver};
use crate::errors::{DeploymentError, HarnessError};
use crate::node::NodeTree;
use crate::report::{RootReport, RunReport};
use crate::runtime;
use crate::scheduler::{self, Scheduler};
use crate::transport::{HttpTransport, Transport};
use crate::variant::{ClassDescriptor, Universe};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Drives root test classes from expansion to verdicts.
pub struct Runner {
    config: HarnessConfig,
    universe: Universe,
    driver: Arc<dyn DeploymentDriver>,
    transport: Arc<dyn Transport>,
    scheduler: Scheduler,
}

impl Runner {
    pub fn new(
        config: HarnessConfig,
        universe: Universe,
        driver: Arc<dyn DeploymentDriver>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let scheduler = Scheduler::new(Arc::clone(&transport), &config);
        Self {
            config,
            universe,
            driver,
            transport,
            scheduler,
        }
    }

    /// Run every root.
    ///
    /// All roots are expanded before anything is deployed, and an expansion
    /// error aborts the run. A root whose deployment fails is reported once
    /// and the run continues with the others.
    pub async fn run(&self, roots: &[ClassDescriptor]) -> Result<RunReport, HarnessError> {
        let started_at = Utc::now();

        let mut trees = Vec::new();
        for root in roots {
            trees.extend(builder::build(root, &self.universe)?);
        }

        info!(
            target: "kat.runner",
            classes = roots.len(),
            deployments = trees.len(),
            nodes = trees.iter().map(NodeTree::len).sum::<usize>(),
            "Expanded test classes"
        );

        let mut reports = Vec::with_capacity(trees.len());
        for tree in &trees {
            reports.push(self.run_tree(tree).await);
        }

        let report = RunReport::new(started_at, reports);
        let counts = report.counts();
        info!(
            target: "kat.runner",
            run_id = %report.run_id,
            passed = counts.passed,
            failed = counts.failed,
            xfailed = counts.expected_failures,
            xpassed = counts.unexpected_passes,
            deployment_failures = counts.deployment_failures,
            "Run complete"
        );
        Ok(report)
    }

    #[instrument(skip_all, fields(root = %tree.root_name()))]
    async fn run_tree(&self, tree: &NodeTree) -> RootReport {
        let root = tree.root_name().to_string();
        let mut env = Environment::from_config(&self.config);

        if let Err(e) = self.deploy(tree, &mut env).await {
            error!(target: "kat.runner", root = %root, error = %e, "Deployment failed");
            return RootReport::deployment_failed(root, e);
        }

        let planned = scheduler::collect_queries(tree, &env);
        let queries = planned.len();
        let results = self.scheduler.run(&root, planned.clone()).await;
        let store = ResultStore::correlate(&planned, results);
        let nodes = runtime::check_tree(tree, &env, &store, self.config.canary_tolerance);

        RootReport { root, queries, nodes }
    }

    /// Aggregate, apply and wait for readiness, pointing `env` at the
    /// applied deployment.
    async fn deploy(&self, tree: &NodeTree, env: &mut Environment) -> Result<(), DeploymentError> {
        let bundle = aggregate::aggregate(tree, env)?;
        let deployment = self.driver.apply(&bundle).await?;
        env.endpoints = deployment.endpoints;

        let requirements = scheduler::collect_requirements(tree, env);
        wait_until_ready(
            &requirements,
            self.driver.as_ref(),
            self.transport.as_ref(),
            self.config.ready_timeout,
            self.config.query_timeout,
        )
        .await
    }
}

/// Run `roots` against a pre-provisioned environment over HTTP.
///
/// Deployed services are reached through `config.endpoints`.
pub async fn run(config: HarnessConfig, universe: Universe, roots: &[ClassDescriptor]) -> Result<RunReport, HarnessError> {
    let driver = Arc::new(StaticDriver::from_config(&config));
    let transport = Arc::new(HttpTransport::new()?);
    Runner::new(config, universe, driver, transport).run(roots).await
}
