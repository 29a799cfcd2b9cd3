//! Live cluster tests.
//!
//! Deploys a gateway and an echo backend with `kubectl` and runs a small
//! suite against them. Requires a reachable cluster and, when the harness
//! runs outside it, `KAT_ENDPOINTS` pointing at port-forwards.

#![cfg(feature = "cluster")]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::observability::init_tracing;
use kat_harness::assertions::{expect_eq, expect_header, AtQuery};
use kat_harness::config::DEFAULT_LOG_DIRECTIVES;
use kat_harness::{
    CheckContext, CheckFailure, ClassDescriptor, ConfigFragment, HarnessConfig, HttpTransport, KubectlDriver,
    NodeContext, Query, Runner, ServiceType, TestNode, Universe,
};
use std::sync::Arc;

struct Plain;
impl TestNode for Plain {}

struct SimpleMapping;

impl TestNode for SimpleMapping {
    fn config(&self, ctx: &NodeContext<'_>) -> Vec<ConfigFragment> {
        vec![ConfigFragment::own(
            ctx.format("apiVersion: ambassador/v0\nkind: Mapping\nname: {self.name}\nprefix: /{self.name}/\nrewrite: /{self.name}/\nservice: http://{self.target.path.k8s}\n")
                .unwrap_or_default(),
        )]
    }

    fn queries(&self, ctx: &NodeContext<'_>) -> Vec<Query> {
        let url = ctx.url(&format!("{}/", ctx.name()));
        vec![
            Query::new(url.clone()),
            Query::new(url).header("Requested-Status", "401").expected(401),
        ]
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Result<(), CheckFailure> {
        let target = ctx.child_k8s("target")?;
        let prefix = format!("/{}/", ctx.name());
        for (i, result) in ctx.results().iter().enumerate() {
            expect_eq("backend", Some(target.as_str()), result.backend_name()).at(i)?;
            let path = result.backend.as_ref().and_then(|b| b.request_path());
            expect_eq("path", Some(prefix.as_str()), path).at(i)?;
            expect_header(result, "server", &["envoy"]).at(i)?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_simple_mapping_on_cluster() {
    let config = HarnessConfig::from_env().expect("valid KAT_* configuration");
    let _ = init_tracing(&config.observability, DEFAULT_LOG_DIRECTIVES);

    let root = ClassDescriptor::gateway("plain", |_| Arc::new(Plain))
        .child(ClassDescriptor::mapping("simplemapping", |_| Arc::new(SimpleMapping)));
    let driver = Arc::new(KubectlDriver::from_config(&config));
    let transport = Arc::new(HttpTransport::new().expect("HTTP transport"));
    let universe = Universe::builder().service(ServiceType::http()).build();

    let report = Runner::new(config, universe, driver, transport)
        .run(&[root])
        .await
        .expect("suite expands");

    assert!(report.is_success(), "{report}");
}
