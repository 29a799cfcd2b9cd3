//! Composable options: parent query decoration and re-issue, config field
//! merging and xfail propagation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use kat_echo::EchoServer;
use kat_harness::assertions::{expect_eq, expect_request_header, expect_true, xfail, AtQuery};
use kat_harness::deploy::mock::MockDriver;
use kat_harness::report::Outcome;
use kat_harness::{
    Axis, CheckContext, CheckFailure, ClassDescriptor, ConfigFragment, Endpoints, HarnessConfig, HttpTransport,
    NodeContext, OptionClass, Query, Runner, ServiceType, TestNode, Universe,
};
use std::sync::Arc;

struct Gateway;
impl TestNode for Gateway {}

struct SimpleMapping;

impl TestNode for SimpleMapping {
    fn config(&self, ctx: &NodeContext<'_>) -> Vec<ConfigFragment> {
        vec![ConfigFragment::own(
            ctx.format("apiVersion: ambassador/v0\nkind: Mapping\nname: {self.name}\nprefix: /{self.name}/\nservice: {self.target.path.k8s}\n")
                .unwrap_or_default(),
        )]
    }

    fn queries(&self, ctx: &NodeContext<'_>) -> Vec<Query> {
        vec![Query::new(ctx.url(&format!("{}/", ctx.name())))]
    }
}

/// Adds its value's headers to every parent query.
struct AddRequestHeaders;

impl TestNode for AddRequestHeaders {
    fn config(&self, ctx: &NodeContext<'_>) -> Vec<ConfigFragment> {
        let value = ctx.option_value().map(|v| v.to_string()).unwrap_or_default();
        vec![ConfigFragment::field(format!("add_request_headers: {value}"))]
    }

    fn decorate_parent_query(&self, ctx: &NodeContext<'_>, query: &mut Query) {
        if let Some(headers) = ctx.option_value().and_then(|v| v.as_object()) {
            for (name, value) in headers {
                query.headers.insert(name, value.as_str().unwrap_or_default());
            }
        }
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Result<(), CheckFailure> {
        for result in ctx.parent_results() {
            expect_request_header(result, "x-foo", &["foo"])?;
        }
        Ok(())
    }
}

/// Rewrites the parent's prefix; values without a leading slash are known
/// to be broken.
struct Rewrite;

impl Rewrite {
    fn broken(ctx: &NodeContext<'_>) -> bool {
        !ctx.option_value()
            .and_then(|v| v.as_str())
            .is_some_and(|v| v.starts_with('/'))
    }
}

impl TestNode for Rewrite {
    fn config(&self, _ctx: &NodeContext<'_>) -> Vec<ConfigFragment> {
        vec![ConfigFragment::field("rewrite: {self.value}")]
    }

    fn decorate_parent_query(&self, ctx: &NodeContext<'_>, query: &mut Query) {
        if Self::broken(ctx) {
            query.xfail = Some("rewrite option is broken for values not beginning in slash".to_string());
        }
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Result<(), CheckFailure> {
        if Self::broken(ctx) {
            return xfail("this is broken");
        }
        Ok(())
    }
}

fn universe() -> Universe {
    Universe::builder()
        .service(ServiceType::http())
        .option(OptionClass::new("add_request_headers", |_| Arc::new(AddRequestHeaders)).values([serde_json::json!({"x-foo": "foo"})]))
        .option(OptionClass::new("rewrite", |_| Arc::new(Rewrite)).values(["/foo", "foo"]).isolated())
        .build()
}

fn suite() -> ClassDescriptor {
    ClassDescriptor::gateway("plain", |_| Arc::new(Gateway)).child(
        ClassDescriptor::mapping("simplemapping", |_| Arc::new(SimpleMapping))
            .axis(Axis::Services)
            .axis(Axis::Options),
    )
}

#[tokio::test]
async fn test_options_compose_with_their_parent() -> Result<(), anyhow::Error> {
    let server = EchoServer::spawn("plain-backend").await?;
    let mut endpoints = Endpoints::new();
    endpoints.insert("plain", server.authority());

    let driver = Arc::new(MockDriver::new(endpoints));
    let runner = Runner::new(
        HarnessConfig::default(),
        universe(),
        driver.clone(),
        Arc::new(HttpTransport::new()?),
    );
    let report = runner.run(&[suite()]).await?;
    assert!(report.is_success(), "{report}");

    let outcome = |name: &str| report.node(name).map(|n| n.outcome.clone());

    // Headers added by the option reach the backend.
    assert_eq!(
        outcome("plain.simplemapping-http-add-request-headers.add_request_headers"),
        Some(Outcome::Passed)
    );
    assert_eq!(
        outcome("plain.simplemapping-http-all.add_request_headers"),
        Some(Outcome::Passed)
    );

    // The broken rewrite is declared on both the option and the parent's query.
    assert_eq!(
        outcome("plain.simplemapping-http-rewrite-1.rewrite-1"),
        Some(Outcome::ExpectedFailure {
            reason: "this is broken".to_string()
        })
    );
    assert_eq!(
        outcome("plain.simplemapping-http-rewrite-1"),
        Some(Outcome::UnexpectedPass {
            reason: "rewrite option is broken for values not beginning in slash".to_string()
        })
    );
    assert_eq!(outcome("plain.simplemapping-http-rewrite-0"), Some(Outcome::Passed));

    // Option fields are merged into the parent's mapping document.
    let bundle = &driver.applied()[0];
    let rewrite = &bundle.group("plain-simplemapping-http-rewrite-1").unwrap().documents[0];
    assert_eq!(rewrite["rewrite"], serde_yaml::Value::from("foo"));
    assert_eq!(rewrite["ambassador_id"], serde_yaml::Value::from("plain"));

    let all = &bundle.group("plain-simplemapping-http-all").unwrap().documents[0];
    assert_eq!(all["add_request_headers"]["x-foo"], serde_yaml::Value::from("foo"));
    assert!(all.get("rewrite").is_none());
    Ok(())
}

/// Two probes on the mapping's prefix.
struct TwoPaths;

impl TestNode for TwoPaths {
    fn config(&self, ctx: &NodeContext<'_>) -> Vec<ConfigFragment> {
        SimpleMapping.config(ctx)
    }

    fn queries(&self, ctx: &NodeContext<'_>) -> Vec<Query> {
        ["a", "b"]
            .into_iter()
            .map(|leaf| Query::new(ctx.url(&format!("{}/{}", ctx.name(), leaf))))
            .collect()
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Result<(), CheckFailure> {
        // Re-issued queries are reachable from the parent too.
        if let Some(variant) = ctx.child_results("variant") {
            expect_eq("re-issued results", ctx.results().len(), variant.len())?;
            for result in variant {
                expect_request_header(result, "x-variant", &["on"])?;
            }
        }
        Ok(())
    }
}

/// Re-issues the parent's queries with an extra header.
struct Variant;

impl TestNode for Variant {
    fn queries(&self, ctx: &NodeContext<'_>) -> Vec<Query> {
        ctx.parent_queries()
            .into_iter()
            .map(|query| query.header("X-Variant", "on"))
            .collect()
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Result<(), CheckFailure> {
        let own = ctx.results();
        let parent = ctx.parent_results();
        expect_eq("results", 2usize, own.len())?;
        expect_eq("parent results", 2usize, parent.len())?;

        for (i, (mine, theirs)) in own.iter().zip(parent).enumerate() {
            expect_eq("index", i, mine.index)?;
            expect_eq("url", &theirs.query.url, &mine.query.url).at(i)?;
            let path = |r: &kat_harness::QueryResult| r.backend.as_ref().and_then(|b| b.request_path()).map(str::to_string);
            expect_eq("path", path(theirs), path(mine)).at(i)?;
            expect_request_header(mine, "x-variant", &["on"])?;
            let untouched = theirs
                .backend
                .as_ref()
                .is_some_and(|b| b.request_header("x-variant").is_none());
            expect_true(untouched, "parent query carries the re-issued header").at(i)?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_option_reissues_parent_queries() -> Result<(), anyhow::Error> {
    let server = EchoServer::spawn("plain-backend").await?;
    let mut endpoints = Endpoints::new();
    endpoints.insert("plain", server.authority());

    let universe = Universe::builder()
        .service(ServiceType::http())
        .option(OptionClass::new("variant", |_| Arc::new(Variant)))
        .build();
    let suite = ClassDescriptor::gateway("plain", |_| Arc::new(Gateway)).child(
        ClassDescriptor::mapping("twopaths", |_| Arc::new(TwoPaths))
            .axis(Axis::Services)
            .axis(Axis::Options),
    );

    let runner = Runner::new(
        HarnessConfig::default(),
        universe,
        Arc::new(MockDriver::new(endpoints)),
        Arc::new(HttpTransport::new()?),
    );
    let report = runner.run(&[suite]).await?;
    assert!(report.is_success(), "{report}");

    // Bare, single-option and "all" variants: 2 parent queries each, plus
    // 2 re-issued ones under each of the two option nodes.
    assert_eq!(report.roots[0].queries, 3 * 2 + 2 * 2);
    for name in [
        "plain.twopaths-http",
        "plain.twopaths-http-variant",
        "plain.twopaths-http-variant.variant",
        "plain.twopaths-http-all.variant",
    ] {
        assert_eq!(report.node(name).map(|n| n.outcome.clone()), Some(Outcome::Passed), "{name}");
    }
    Ok(())
}
