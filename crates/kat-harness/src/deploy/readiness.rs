//! Waiting for a deployment's requirements before phase 0.

use super::DeploymentDriver;
use crate::errors::DeploymentError;
use crate::eventual::eventually;
use crate::query::{Query, Requirement};
use crate::transport::Transport;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Poll every requirement concurrently until all hold or `ready_timeout`
/// expires.
///
/// URL requirements are probed through `transport`, each probe bounded by
/// `query_timeout`; pod requirements are delegated to `driver`. A driver
/// that cannot run at all fails immediately rather than after the timeout.
pub async fn wait_until_ready(
    requirements: &[Requirement],
    driver: &dyn DeploymentDriver,
    transport: &dyn Transport,
    ready_timeout: Duration,
    query_timeout: Duration,
) -> Result<(), DeploymentError> {
    let mut seen = BTreeSet::new();
    let unique: Vec<&Requirement> = requirements
        .iter()
        .filter(|r| seen.insert(r.describe()))
        .collect();

    info!(
        target: "kat.deploy.readiness",
        requirements = unique.len(),
        timeout_secs = ready_timeout.as_secs(),
        "Waiting for deployment readiness"
    );

    let checks = unique.iter().map(|requirement| async move {
        let ready = match requirement {
            Requirement::Url(query) => {
                eventually(ready_timeout, move || url_ready(transport, query, query_timeout)).await
            }
            Requirement::Pod(name) => {
                driver.pod_ready(name).await?
                    || eventually(ready_timeout, move || async move {
                        driver.pod_ready(name).await.unwrap_or(false)
                    })
                    .await
            }
        };
        debug!(target: "kat.deploy.readiness", requirement = %requirement.describe(), ready, "Requirement checked");
        Ok::<_, DeploymentError>((requirement.describe(), ready))
    });

    let mut pending = Vec::new();
    for outcome in join_all(checks).await {
        let (description, ready) = outcome?;
        if !ready {
            pending.push(description);
        }
    }

    if pending.is_empty() {
        Ok(())
    } else {
        warn!(target: "kat.deploy.readiness", pending = ?pending, "Deployment not ready");
        Err(DeploymentError::NotReady {
            timeout_secs: ready_timeout.as_secs(),
            pending,
        })
    }
}

async fn url_ready(transport: &dyn Transport, query: &Query, query_timeout: Duration) -> bool {
    match tokio::time::timeout(query_timeout, transport.execute(query)).await {
        Ok(Ok(exchange)) => query.status_matches(exchange.status),
        _ => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::deploy::mock::MockDriver;
    use crate::deploy::Endpoints;
    use crate::transport::mock::MockTransport;
    use crate::transport::Exchange;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const SHORT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_all_requirements_met() {
        let transport = MockTransport::with_status(200);
        let driver = MockDriver::new(Endpoints::new());
        let requirements = vec![
            Requirement::Url(Query::new("http://plain/ambassador/v0/check_ready")),
            Requirement::Pod("plain-simplemapping-http-http".to_string()),
        ];

        wait_until_ready(&requirements, &driver, &transport, SHORT, SHORT)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_url_becomes_ready() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let transport = MockTransport::new(move |_| {
            let status = if counter.fetch_add(1, Ordering::SeqCst) == 0 { 503 } else { 200 };
            Ok(Exchange::new(status))
        });
        let driver = MockDriver::new(Endpoints::new());
        let requirements = vec![Requirement::Url(Query::new("http://plain/ready"))];

        wait_until_ready(&requirements, &driver, &transport, Duration::from_secs(5), SHORT)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pending_requirements_reported() {
        let transport = MockTransport::refusing();
        let driver = MockDriver::new(Endpoints::new()).with_unready_pod("auth");
        let requirements = vec![
            Requirement::Url(Query::new("http://plain/ready")),
            Requirement::Pod("auth".to_string()),
            Requirement::Pod("target".to_string()),
        ];

        let err = wait_until_ready(&requirements, &driver, &transport, SHORT, SHORT)
            .await
            .unwrap_err();
        match err {
            DeploymentError::NotReady { pending, .. } => {
                assert_eq!(pending, vec!["url http://plain/ready", "pod auth"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_requirements_checked_once() {
        let transport = MockTransport::with_status(200);
        let driver = MockDriver::new(Endpoints::new());
        let requirement = Requirement::Url(Query::new("http://plain/ready"));

        wait_until_ready(&[requirement.clone(), requirement], &driver, &transport, SHORT, SHORT)
            .await
            .unwrap();
        assert_eq!(transport.call_count(), 1);
    }
}
