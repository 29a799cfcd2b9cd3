//! Test node arena.
//!
//! A deployment's nodes live in one [`NodeTree`], addressed by [`NodeId`].
//! Parent and child links are indices into the arena, so a node can reach
//! its parent's configuration and results without owning it.

use crate::aggregate::ConfigFragment;
use crate::assertions::CheckFailure;
use crate::deploy::Environment;
use crate::query::{Query, Requirement};
use crate::runtime::CheckContext;
use crate::services;
use crate::template::{self, TemplateError};
use crate::variant::OptionInstance;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Stable index of a node within its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// What a node stands for in the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    /// Root test owning a gateway and its deployment.
    Gateway,
    /// Routing test attached to a gateway.
    Mapping,
    /// Composable option decorating its parent mapping.
    Option,
    /// Backend service the gateway routes to.
    Service,
}

/// A backend service type, e.g. the plain HTTP echo backend.
///
/// `kind` selects the implementation; `name` is the node name services of
/// this type get (defaults to the kind).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceType {
    kind: String,
    name: String,
}

impl ServiceType {
    pub fn new(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            name: kind.clone(),
            kind,
        }
    }

    /// The plain HTTP echo backend.
    pub fn http() -> Self {
        Self::new("http")
    }

    /// Same service type under a different node name.
    pub fn named(&self, name: impl Into<String>) -> Self {
        Self {
            kind: self.kind.clone(),
            name: name.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Lowercase a name and replace anything outside `[a-z0-9]` with `-`.
pub fn sanitize(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_matches('-').to_string()
}

/// Chain of node names from the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePath {
    segments: Vec<String>,
}

impl NodePath {
    pub(crate) fn root(name: &str) -> Self {
        Self {
            segments: vec![name.to_string()],
        }
    }

    pub(crate) fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    /// Dot-joined names, e.g. `plain.simplemapping-http`.
    pub fn fqdn(&self) -> String {
        self.segments.join(".")
    }

    /// Kubernetes-safe name, e.g. `plain-simplemapping-http`.
    pub fn k8s(&self) -> String {
        self.segments
            .iter()
            .map(|s| sanitize(s))
            .collect::<Vec<_>>()
            .join("-")
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

/// Behavior of a test node.
///
/// Every method is a pure function of the node's context; the harness calls
/// them in a fixed order (config, manifests, requirements, queries, check)
/// and never concurrently for the same tree.
pub trait TestNode: Send + Sync {
    /// Configuration fragments contributed by this node.
    fn config(&self, _ctx: &NodeContext<'_>) -> Vec<ConfigFragment> {
        Vec::new()
    }

    /// Infrastructure manifest template for this node.
    fn manifests(&self, ctx: &NodeContext<'_>) -> Option<String> {
        services::default_manifest(ctx)
    }

    /// Readiness requirements checked before phase 0.
    fn requirements(&self, ctx: &NodeContext<'_>) -> Vec<Requirement> {
        ctx.default_requirements()
    }

    /// Queries to issue, in declaration order.
    fn queries(&self, _ctx: &NodeContext<'_>) -> Vec<Query> {
        Vec::new()
    }

    /// Adjust one of the parent's queries before it is dispatched.
    fn decorate_parent_query(&self, _ctx: &NodeContext<'_>, _query: &mut Query) {}

    /// URL scheme queries against this gateway use.
    fn scheme(&self) -> &'static str {
        "http"
    }

    /// Reason this whole node is expected to fail, if it is.
    fn xfail(&self, _ctx: &NodeContext<'_>) -> Option<String> {
        None
    }

    /// Assert on results once every phase has drained.
    fn check(&self, _ctx: &CheckContext<'_>) -> Result<(), CheckFailure> {
        Ok(())
    }
}

/// One node in the arena.
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) kind: String,
    pub(crate) name: String,
    pub(crate) role: NodeRole,
    pub(crate) label: Option<String>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) path: NodePath,
    pub(crate) ambassador_id: String,
    pub(crate) service: Option<ServiceType>,
    pub(crate) option: Option<OptionInstance>,
    pub(crate) params: BTreeMap<String, Value>,
    pub(crate) labels: BTreeMap<String, String>,
    pub(crate) behavior: Arc<dyn TestNode>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("label", &self.label)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("ambassador_id", &self.ambassador_id)
            .finish_non_exhaustive()
    }
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Class kind this node was built from.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Role of this node within its parent (`target`, `canary`, option kind).
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn path(&self) -> &NodePath {
        &self.path
    }

    /// Routing group identifier of the gateway this node belongs to.
    pub fn ambassador_id(&self) -> &str {
        &self.ambassador_id
    }

    pub fn service(&self) -> Option<&ServiceType> {
        self.service.as_ref()
    }

    pub fn option(&self) -> Option<&OptionInstance> {
        self.option.as_ref()
    }

    pub fn behavior(&self) -> &dyn TestNode {
        self.behavior.as_ref()
    }
}

/// Arena of one deployment's nodes, stored in depth-first pre-order.
#[derive(Debug, Default)]
pub struct NodeTree {
    nodes: Vec<Node>,
}

impl NodeTree {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a node, linking it under its parent.
    pub(crate) fn push(&mut self, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.id = id;
        if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(p.0)) {
            parent.children.push(id);
        }
        self.nodes.push(node);
        id
    }

    pub fn root(&self) -> Option<&Node> {
        self.nodes.first()
    }

    /// Name of the root node, or an empty string for an empty tree.
    pub fn root_name(&self) -> &str {
        self.root().map(Node::name).unwrap_or_default()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Nodes in depth-first pre-order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &Node> {
        self.get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|c| self.get(*c))
    }

    /// Node ids with every node after all of its descendants.
    pub fn post_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        if let Some(root) = self.root() {
            self.visit_post_order(root.id, &mut order);
        }
        order
    }

    fn visit_post_order(&self, id: NodeId, order: &mut Vec<NodeId>) {
        for child in self.children(id) {
            self.visit_post_order(child.id, order);
        }
        order.push(id);
    }

    pub fn context<'a>(&'a self, id: NodeId, env: &'a Environment) -> Option<NodeContext<'a>> {
        self.get(id).map(|node| NodeContext {
            tree: self,
            node,
            env,
        })
    }
}

/// Read-only view of one node and its surroundings, handed to [`TestNode`]
/// methods.
#[derive(Clone, Copy)]
pub struct NodeContext<'a> {
    tree: &'a NodeTree,
    node: &'a Node,
    env: &'a Environment,
}

impl<'a> NodeContext<'a> {
    pub fn tree(&self) -> &'a NodeTree {
        self.tree
    }

    pub fn node(&self) -> &'a Node {
        self.node
    }

    pub fn env(&self) -> &'a Environment {
        self.env
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }

    pub fn name(&self) -> &'a str {
        &self.node.name
    }

    pub fn role(&self) -> NodeRole {
        self.node.role
    }

    pub fn path(&self) -> &'a NodePath {
        &self.node.path
    }

    pub fn ambassador_id(&self) -> &'a str {
        &self.node.ambassador_id
    }

    /// Variant parameter, e.g. a canary weight.
    pub fn param(&self, key: &str) -> Option<&'a Value> {
        self.node.params.get(key)
    }

    /// Variant parameter as an unsigned integer.
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.param(key).and_then(Value::as_u64)
    }

    /// Variant parameter as a string (strings only).
    pub fn param_str(&self, key: &str) -> Option<&'a str> {
        self.param(key).and_then(Value::as_str)
    }

    /// Display label of a labelled parameter, falling back to its value.
    pub(crate) fn param_display(&self, key: &str) -> Option<String> {
        if let Some(label) = self.node.labels.get(key) {
            return Some(label.clone());
        }
        self.param(key).map(template::render_value)
    }

    /// Value of this option node.
    pub fn option_value(&self) -> Option<&'a Value> {
        self.node.option.as_ref().map(|o| &o.value)
    }

    fn at(&self, node: &'a Node) -> NodeContext<'a> {
        NodeContext {
            tree: self.tree,
            node,
            env: self.env,
        }
    }

    pub fn parent(&self) -> Option<NodeContext<'a>> {
        self.node
            .parent
            .and_then(|p| self.tree.get(p))
            .map(|n| self.at(n))
    }

    /// Child with the given label, e.g. `target` or `canary`.
    pub fn child(&self, label: &str) -> Option<NodeContext<'a>> {
        self.tree
            .children(self.node.id)
            .find(|c| c.label.as_deref() == Some(label))
            .map(|n| self.at(n))
    }

    pub fn children(&self) -> impl Iterator<Item = NodeContext<'a>> + 'a {
        let this = *self;
        self.tree.children(self.node.id).map(move |n| this.at(n))
    }

    /// Option children, in composition order.
    pub fn options(&self) -> Vec<NodeContext<'a>> {
        self.children()
            .filter(|c| c.role() == NodeRole::Option)
            .collect()
    }

    /// Nearest gateway at or above this node.
    pub fn gateway(&self) -> Option<NodeContext<'a>> {
        let mut current = Some(*self);
        while let Some(ctx) = current {
            if ctx.role() == NodeRole::Gateway {
                return Some(ctx);
            }
            current = ctx.parent();
        }
        None
    }

    /// URL of `prefix` on this node's gateway, using the gateway's scheme.
    pub fn url(&self, prefix: &str) -> String {
        let scheme = self
            .gateway()
            .map(|g| g.node.behavior.scheme())
            .unwrap_or("http");
        self.url_with_scheme(prefix, scheme)
    }

    /// URL of `prefix` on this node's gateway with an explicit scheme.
    pub fn url_with_scheme(&self, prefix: &str, scheme: &str) -> String {
        let name = self
            .gateway()
            .map(|g| g.path().k8s())
            .unwrap_or_else(|| self.path().k8s());
        let authority = self.env.endpoints.authority(&name);
        format!(
            "{}://{}/{}",
            scheme,
            authority,
            prefix.trim_start_matches('/')
        )
    }

    /// Substitute `{self.<attr>}` placeholders against this node.
    pub fn format(&self, text: &str) -> Result<String, TemplateError> {
        template::render(self, text, &[])
    }

    /// Like [`NodeContext::format`], also substituting `{key}` from `extras`.
    pub fn format_with(&self, text: &str, extras: &[(&str, &str)]) -> Result<String, TemplateError> {
        template::render(self, text, extras)
    }

    /// The parent's queries, as the parent declares them.
    pub fn parent_queries(&self) -> Vec<Query> {
        self.parent()
            .map(|p| p.node.behavior.queries(&p))
            .unwrap_or_default()
    }

    /// Requirements every node of this role has unless it overrides them.
    ///
    /// Gateways must answer their readiness path; services must have a
    /// ready pod.
    pub fn default_requirements(&self) -> Vec<Requirement> {
        match self.role() {
            NodeRole::Gateway => vec![Requirement::Url(Query::new(
                self.url(&self.env.readiness_path),
            ))],
            NodeRole::Service => vec![Requirement::Pod(self.path().k8s())],
            NodeRole::Mapping | NodeRole::Option => Vec::new(),
        }
    }
}
