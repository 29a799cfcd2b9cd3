//! Driver for pre-provisioned environments.

use super::{Deployment, DeploymentDriver, Endpoints};
use crate::aggregate::DeploymentBundle;
use crate::config::HarnessConfig;
use crate::errors::DeploymentError;
use tracing::{debug, info};

/// Treats the environment as already deployed.
///
/// The bundle is rendered (so configuration errors still surface) but not
/// applied anywhere; every pod is considered ready, and gateways are reached
/// through the configured endpoint map.
#[derive(Debug, Clone, Default)]
pub struct StaticDriver {
    endpoints: Endpoints,
}

impl StaticDriver {
    pub fn new(endpoints: Endpoints) -> Self {
        Self { endpoints }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(Endpoints::from(config.endpoints.clone()))
    }
}

#[async_trait::async_trait]
impl DeploymentDriver for StaticDriver {
    async fn apply(&self, bundle: &DeploymentBundle) -> Result<Deployment, DeploymentError> {
        let rendered = bundle.render()?;
        debug!(
            target: "kat.deploy.static",
            root = %bundle.root,
            bytes = rendered.len(),
            "Rendered bundle for pre-provisioned environment"
        );
        info!(
            target: "kat.deploy.static",
            root = %bundle.root,
            endpoints = self.endpoints.len(),
            "Using pre-provisioned deployment"
        );

        Ok(Deployment {
            root: bundle.root.clone(),
            endpoints: self.endpoints.clone(),
        })
    }

    async fn pod_ready(&self, _name: &str) -> Result<bool, DeploymentError> {
        Ok(true)
    }
}
