//! Built-in node behaviors and default manifests.
//!
//! Manifest templates are rendered by the aggregator with the node's own
//! attributes plus the `{namespace}`, `{gateway_image}` and `{backend_image}`
//! extras.

use crate::node::{NodeContext, NodeRole, TestNode};

/// Gateway deployment: one pod running the gateway under test, exposed on
/// port 80 (and 443 for TLS variants).
pub const GATEWAY_MANIFEST: &str = r#"
---
apiVersion: v1
kind: Service
metadata:
  name: {self.path.k8s}
  namespace: {namespace}
  labels:
    kat-ambassador-id: {self.ambassador_id}
spec:
  selector:
    app: {self.path.k8s}
  ports:
  - name: http
    port: 80
    targetPort: 80
  - name: https
    port: 443
    targetPort: 443
---
apiVersion: v1
kind: Pod
metadata:
  name: {self.path.k8s}
  namespace: {namespace}
  labels:
    app: {self.path.k8s}
spec:
  containers:
  - name: gateway
    image: {gateway_image}
    env:
    - name: AMBASSADOR_ID
      value: {self.ambassador_id}
"#;

/// Echo backend deployment: one pod reporting its name as `BACKEND`.
pub const BACKEND_MANIFEST: &str = r#"
---
apiVersion: v1
kind: Service
metadata:
  name: {self.path.k8s}
  namespace: {namespace}
spec:
  selector:
    app: {self.path.k8s}
  ports:
  - name: http
    port: 80
    targetPort: 8080
---
apiVersion: v1
kind: Pod
metadata:
  name: {self.path.k8s}
  namespace: {namespace}
  labels:
    app: {self.path.k8s}
spec:
  containers:
  - name: backend
    image: {backend_image}
    env:
    - name: BACKEND
      value: {self.path.k8s}
"#;

/// Behavior of backend service nodes: deployed, never queried directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServiceNode;

impl TestNode for ServiceNode {}

/// Manifest a node of this role gets unless it provides its own.
///
/// Mappings and options are pure configuration and deploy nothing.
pub fn default_manifest(ctx: &NodeContext<'_>) -> Option<String> {
    match ctx.role() {
        NodeRole::Gateway => Some(GATEWAY_MANIFEST.to_string()),
        NodeRole::Service => Some(BACKEND_MANIFEST.to_string()),
        NodeRole::Mapping | NodeRole::Option => None,
    }
}
