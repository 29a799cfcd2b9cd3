//! Deployment drivers.
//!
//! A [`DeploymentDriver`] applies one [`DeploymentBundle`] and answers pod
//! readiness questions. The harness never mutates a deployment once queries
//! start.

mod kubectl;
mod readiness;
mod static_driver;

pub use kubectl::KubectlDriver;
pub use readiness::wait_until_ready;
pub use static_driver::StaticDriver;

use crate::aggregate::DeploymentBundle;
use crate::config::{
    HarnessConfig, DEFAULT_BACKEND_IMAGE, DEFAULT_GATEWAY_IMAGE, DEFAULT_NAMESPACE, DEFAULT_READINESS_PATH,
};
use crate::errors::DeploymentError;
use std::collections::BTreeMap;

/// How to reach deployed services: `path.k8s` name to `host:port`.
///
/// Names without an entry are reached by their own name, which resolves
/// inside the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints(BTreeMap<String, String>);

impl Endpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, authority: impl Into<String>) {
        self.0.insert(name.into(), authority.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// `host:port` for `name`, falling back to the name itself.
    pub fn authority(&self, name: &str) -> String {
        self.get(name).unwrap_or(name).to_string()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, String>> for Endpoints {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

/// Deployment parameters nodes can see while building config and queries.
#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    pub endpoints: Endpoints,
    /// Gateway readiness path, without a leading `/`.
    pub readiness_path: String,
    pub namespace: String,
    pub gateway_image: String,
    pub backend_image: String,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::new(),
            readiness_path: DEFAULT_READINESS_PATH.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            gateway_image: DEFAULT_GATEWAY_IMAGE.to_string(),
            backend_image: DEFAULT_BACKEND_IMAGE.to_string(),
        }
    }
}

impl Environment {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            endpoints: Endpoints::from(config.endpoints.clone()),
            readiness_path: config.readiness_path.clone(),
            namespace: config.namespace.clone(),
            gateway_image: config.gateway_image.clone(),
            backend_image: config.backend_image.clone(),
        }
    }
}

/// A bundle as applied by a driver.
#[derive(Debug, Clone, PartialEq)]
pub struct Deployment {
    /// Root node name.
    pub root: String,
    /// Where the deployed services can be reached.
    pub endpoints: Endpoints,
}

/// Applies deployment bundles to a live environment.
#[async_trait::async_trait]
pub trait DeploymentDriver: Send + Sync {
    /// Apply a bundle. Called exactly once per root.
    async fn apply(&self, bundle: &DeploymentBundle) -> Result<Deployment, DeploymentError>;

    /// Whether the named pod is ready to serve.
    async fn pod_ready(&self, name: &str) -> Result<bool, DeploymentError>;
}

/// Mock deployment drivers for tests.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Driver that records applied bundles and can be told to reject them.
    #[derive(Debug, Default)]
    pub struct MockDriver {
        endpoints: Endpoints,
        rejected_roots: Vec<String>,
        unready_pods: Vec<String>,
        applied: Mutex<Vec<DeploymentBundle>>,
    }

    impl MockDriver {
        pub fn new(endpoints: Endpoints) -> Self {
            Self {
                endpoints,
                ..Self::default()
            }
        }

        /// Reject bundles for this root.
        pub fn rejecting(mut self, root: impl Into<String>) -> Self {
            self.rejected_roots.push(root.into());
            self
        }

        /// Never report this pod ready.
        pub fn with_unready_pod(mut self, name: impl Into<String>) -> Self {
            self.unready_pods.push(name.into());
            self
        }

        pub fn applied(&self) -> Vec<DeploymentBundle> {
            self.applied.lock().map(|a| a.clone()).unwrap_or_default()
        }
    }

    #[async_trait::async_trait]
    impl DeploymentDriver for MockDriver {
        async fn apply(&self, bundle: &DeploymentBundle) -> Result<Deployment, DeploymentError> {
            if self.rejected_roots.contains(&bundle.root) {
                return Err(DeploymentError::Rejected(format!("{} rejected by mock", bundle.root)));
            }
            if let Ok(mut applied) = self.applied.lock() {
                applied.push(bundle.clone());
            }
            Ok(Deployment {
                root: bundle.root.clone(),
                endpoints: self.endpoints.clone(),
            })
        }

        async fn pod_ready(&self, name: &str) -> Result<bool, DeploymentError> {
            Ok(!self.unready_pods.iter().any(|p| p == name))
        }
    }
}
