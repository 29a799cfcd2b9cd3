//! Driver applying bundles with `kubectl`.

use super::{Deployment, DeploymentDriver, Endpoints};
use crate::aggregate::DeploymentBundle;
use crate::config::HarnessConfig;
use crate::errors::DeploymentError;
use crate::report::sanitize;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info};

/// How long a single `kubectl wait` may block.
const WAIT_TIMEOUT: &str = "5s";

/// Pipes the rendered bundle to `kubectl apply -f -` and checks pods with
/// `kubectl wait`.
#[derive(Debug, Clone)]
pub struct KubectlDriver {
    kubectl: String,
    namespace: String,
    endpoints: Endpoints,
}

impl KubectlDriver {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            namespace: namespace.into(),
            endpoints: Endpoints::new(),
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.namespace.clone()).with_endpoints(Endpoints::from(config.endpoints.clone()))
    }

    /// Use a different `kubectl` binary.
    pub fn with_binary(mut self, kubectl: impl Into<String>) -> Self {
        self.kubectl = kubectl.into();
        self
    }

    /// Reach gateways through these endpoints instead of in-cluster names,
    /// e.g. when the harness runs outside the cluster with port forwards.
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.kubectl);
        command.arg("-n").arg(&self.namespace).kill_on_drop(true);
        command
    }
}

#[async_trait::async_trait]
impl DeploymentDriver for KubectlDriver {
    async fn apply(&self, bundle: &DeploymentBundle) -> Result<Deployment, DeploymentError> {
        let rendered = bundle.render()?;

        let mut child = self
            .command()
            .args(["apply", "-f", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                error!(target: "kat.deploy.kubectl", error = %e, "Failed to spawn kubectl");
                DeploymentError::Command(format!("{}: {}", self.kubectl, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(rendered.as_bytes()).await {
                // Reap the child before giving up on it.
                let _ = child.kill().await;
                error!(target: "kat.deploy.kubectl", error = %e, "Failed to write bundle to kubectl");
                return Err(DeploymentError::Command(format!("writing bundle to {}: {}", self.kubectl, e)));
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| DeploymentError::Command(e.to_string()))?;

        if !output.status.success() {
            let stderr = sanitize(&String::from_utf8_lossy(&output.stderr));
            error!(
                target: "kat.deploy.kubectl",
                root = %bundle.root,
                stderr = %stderr,
                "kubectl apply failed"
            );
            return Err(DeploymentError::Rejected(stderr));
        }

        debug!(
            target: "kat.deploy.kubectl",
            output = %String::from_utf8_lossy(&output.stdout).trim(),
            "kubectl apply output"
        );
        info!(
            target: "kat.deploy.kubectl",
            root = %bundle.root,
            namespace = %self.namespace,
            "Applied deployment bundle"
        );

        Ok(Deployment {
            root: bundle.root.clone(),
            endpoints: self.endpoints.clone(),
        })
    }

    async fn pod_ready(&self, name: &str) -> Result<bool, DeploymentError> {
        let output = self
            .command()
            .args([
                "wait",
                "--for=condition=Ready",
                "pod",
                "-l",
                &format!("app={name}"),
                &format!("--timeout={WAIT_TIMEOUT}"),
            ])
            .output()
            .await
            .map_err(|e| DeploymentError::Command(format!("{}: {}", self.kubectl, e)))?;

        Ok(output.status.success())
    }
}
