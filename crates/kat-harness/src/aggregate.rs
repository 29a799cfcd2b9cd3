//! Configuration and manifest aggregation.
//!
//! Walks a node tree depth-first and turns every node's configuration and
//! manifest fragments into one [`DeploymentBundle`]. Fragments are rendered
//! once, against the node that issued them, then:
//!
//! - documents are parsed, validated (`kind` and `name` are required) and
//!   given the issuing node's `ambassador_id` when they carry none;
//! - option fields are merged into every `Mapping` document their parent
//!   mapping emits;
//! - documents are grouped by owner, so configuration aimed at the gateway
//!   never mixes with configuration aimed at a backend service.

use crate::deploy::Environment;
use crate::errors::AggregationError;
use crate::node::{NodeContext, NodeId, NodeRole, NodeTree};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Document kind option fields are merged into.
pub const MAPPING_KIND: &str = "Mapping";

const AMBASSADOR_ID: &str = "ambassador_id";

/// Node a configuration document is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    /// The issuing node.
    SelfNode,
    /// The issuing node's parent (e.g. an auth module on the gateway).
    Parent,
    /// A child of the issuing node by label (e.g. `target`, `canary`).
    Child(String),
    /// Any node by id.
    Node(NodeId),
}

/// One configuration fragment produced by a node's `config()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigFragment {
    /// YAML documents attached to `owner`.
    Document { owner: Owner, text: String },
    /// `key: value` lines merged into the parent mapping's documents.
    Field { text: String },
}

impl ConfigFragment {
    /// Documents owned by the issuing node.
    pub fn own(text: impl Into<String>) -> Self {
        ConfigFragment::Document {
            owner: Owner::SelfNode,
            text: text.into(),
        }
    }

    pub fn for_parent(text: impl Into<String>) -> Self {
        ConfigFragment::Document {
            owner: Owner::Parent,
            text: text.into(),
        }
    }

    pub fn for_child(label: impl Into<String>, text: impl Into<String>) -> Self {
        ConfigFragment::Document {
            owner: Owner::Child(label.into()),
            text: text.into(),
        }
    }

    pub fn for_node(id: NodeId, text: impl Into<String>) -> Self {
        ConfigFragment::Document {
            owner: Owner::Node(id),
            text: text.into(),
        }
    }

    /// Option field, e.g. `cors: { origins: "*" }`.
    pub fn field(text: impl Into<String>) -> Self {
        ConfigFragment::Field { text: text.into() }
    }
}

/// Rendered infrastructure manifest of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// `path.k8s` of the issuing node.
    pub owner: String,
    pub text: String,
}

/// Configuration documents attached to one owner.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigGroup {
    /// `path.k8s` of the owning node.
    pub owner: String,
    pub documents: Vec<Value>,
}

impl ConfigGroup {
    /// The documents as a YAML multi-document stream.
    pub fn to_yaml(&self) -> Result<String, AggregationError> {
        let mut out = String::new();
        for document in &self.documents {
            let text =
                serde_yaml::to_string(document).map_err(|e| AggregationError::Render(e.to_string()))?;
            out.push_str("---\n");
            out.push_str(&text);
        }
        Ok(out)
    }
}

/// Everything one root deploys, submitted once to the deployment driver.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentBundle {
    /// Root node name.
    pub root: String,
    /// Root routing group identifier.
    pub ambassador_id: String,
    /// Manifests in depth-first order.
    pub manifests: Vec<Manifest>,
    /// Configuration grouped by owner, in order of first appearance.
    pub config: Vec<ConfigGroup>,
}

impl DeploymentBundle {
    pub fn group(&self, owner: &str) -> Option<&ConfigGroup> {
        self.config.iter().find(|g| g.owner == owner)
    }

    /// Every configuration document, group by group.
    pub fn documents(&self) -> impl Iterator<Item = &Value> {
        self.config.iter().flat_map(|g| g.documents.iter())
    }

    /// Render the bundle as one YAML stream: the manifests, then one
    /// ConfigMap per configuration group.
    pub fn render(&self) -> Result<String, AggregationError> {
        let mut parts: Vec<String> = self
            .manifests
            .iter()
            .map(|m| m.text.trim().trim_start_matches("---").trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        for group in &self.config {
            let config_map = serde_json::json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {
                    "name": format!("{}-config", group.owner),
                    "labels": {
                        "kat-owner": group.owner,
                        "kat-ambassador-id": self.ambassador_id,
                    },
                },
                "data": {
                    "config.yaml": group.to_yaml()?,
                },
            });
            let text =
                serde_yaml::to_string(&config_map).map_err(|e| AggregationError::Render(e.to_string()))?;
            parts.push(text.trim().to_string());
        }

        let mut out = String::new();
        for part in parts {
            out.push_str("---\n");
            out.push_str(&part);
            out.push('\n');
        }
        Ok(out)
    }
}

struct Collected {
    issuer: NodeId,
    owner: NodeId,
    document: Mapping,
}

/// Aggregate one tree into its deployment bundle.
pub fn aggregate(tree: &NodeTree, env: &Environment) -> Result<DeploymentBundle, AggregationError> {
    let extras = [
        ("namespace", env.namespace.as_str()),
        ("gateway_image", env.gateway_image.as_str()),
        ("backend_image", env.backend_image.as_str()),
    ];

    let mut manifests = Vec::new();
    let mut documents: Vec<Collected> = Vec::new();
    let mut fields: BTreeMap<NodeId, Vec<(NodeId, Mapping)>> = BTreeMap::new();

    for node in tree.iter() {
        let Some(ctx) = tree.context(node.id(), env) else {
            continue;
        };
        let behavior = node.behavior();

        if let Some(template) = behavior.manifests(&ctx) {
            let text = render(&ctx, &template, &extras)?;
            if !text.trim().is_empty() {
                manifests.push(Manifest {
                    owner: ctx.path().k8s(),
                    text,
                });
            }
        }

        for fragment in behavior.config(&ctx) {
            match fragment {
                ConfigFragment::Document { owner, text } => {
                    let owner = resolve_owner(&ctx, &owner)?;
                    for document in parse_documents(&ctx, &render(&ctx, &text, &[])?)? {
                        documents.push(Collected {
                            issuer: ctx.id(),
                            owner,
                            document,
                        });
                    }
                }
                ConfigFragment::Field { text } => {
                    let parent = ctx
                        .parent()
                        .filter(|p| p.role() == NodeRole::Mapping)
                        .ok_or_else(|| AggregationError::OrphanField {
                            node: ctx.name().to_string(),
                        })?;
                    let field = parse_field(&ctx, &render(&ctx, &text, &[])?)?;
                    fields.entry(parent.id()).or_default().push((ctx.id(), field));
                }
            }
        }
    }

    for collected in &mut documents {
        let Some(pending) = fields.get(&collected.issuer) else {
            continue;
        };
        if collected.document.get("kind").and_then(Value::as_str) != Some(MAPPING_KIND) {
            continue;
        }
        for (_, field) in pending {
            for (key, value) in field {
                collected.document.insert(key.clone(), value.clone());
            }
        }
    }

    let mut config: Vec<ConfigGroup> = Vec::new();
    for collected in documents {
        let owner = tree
            .get(collected.owner)
            .map(|n| n.path().k8s())
            .unwrap_or_default();
        let document = Value::Mapping(collected.document);
        match config.iter_mut().find(|g| g.owner == owner) {
            Some(group) => group.documents.push(document),
            None => config.push(ConfigGroup {
                owner,
                documents: vec![document],
            }),
        }
    }

    let bundle = DeploymentBundle {
        root: tree.root_name().to_string(),
        ambassador_id: tree
            .root()
            .map(|r| r.ambassador_id().to_string())
            .unwrap_or_default(),
        manifests,
        config,
    };

    debug!(
        target: "kat.aggregate",
        root = %bundle.root,
        manifests = bundle.manifests.len(),
        groups = bundle.config.len(),
        documents = bundle.documents().count(),
        "Aggregated deployment bundle"
    );
    Ok(bundle)
}

fn render(ctx: &NodeContext<'_>, text: &str, extras: &[(&str, &str)]) -> Result<String, AggregationError> {
    ctx.format_with(text, extras)
        .map_err(|source| AggregationError::Template {
            node: ctx.path().fqdn(),
            source,
        })
}

fn resolve_owner(ctx: &NodeContext<'_>, owner: &Owner) -> Result<NodeId, AggregationError> {
    let unknown = |owner: &str| AggregationError::UnknownOwner {
        node: ctx.path().fqdn(),
        owner: owner.to_string(),
    };

    match owner {
        Owner::SelfNode => Ok(ctx.id()),
        Owner::Parent => ctx.parent().map(|p| p.id()).ok_or_else(|| unknown("parent")),
        Owner::Child(label) => ctx.child(label).map(|c| c.id()).ok_or_else(|| unknown(label)),
        Owner::Node(id) => ctx
            .tree()
            .get(*id)
            .map(|n| n.id())
            .ok_or_else(|| unknown(&id.index().to_string())),
    }
}

fn parse_documents(ctx: &NodeContext<'_>, text: &str) -> Result<Vec<Mapping>, AggregationError> {
    let mut documents = Vec::new();

    for deserializer in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(deserializer).map_err(|e| AggregationError::InvalidYaml {
            node: ctx.path().fqdn(),
            message: e.to_string(),
        })?;

        let mut document = match value {
            Value::Null => continue,
            Value::Mapping(mapping) => mapping,
            _ => {
                return Err(AggregationError::InvalidYaml {
                    node: ctx.path().fqdn(),
                    message: "document is not a mapping".to_string(),
                })
            }
        };

        for field in ["kind", "name"] {
            if document.get(field).and_then(Value::as_str).is_none() {
                return Err(AggregationError::MissingField {
                    node: ctx.path().fqdn(),
                    field,
                });
            }
        }

        if !document.contains_key(AMBASSADOR_ID) {
            document.insert(
                Value::from(AMBASSADOR_ID),
                Value::from(ctx.ambassador_id()),
            );
        }
        documents.push(document);
    }
    Ok(documents)
}

fn parse_field(ctx: &NodeContext<'_>, text: &str) -> Result<Mapping, AggregationError> {
    match serde_yaml::from_str::<Value>(text) {
        Ok(Value::Mapping(mapping)) => Ok(mapping),
        Ok(_) => Err(AggregationError::InvalidYaml {
            node: ctx.path().fqdn(),
            message: "option field is not a `key: value` mapping".to_string(),
        }),
        Err(e) => Err(AggregationError::InvalidYaml {
            node: ctx.path().fqdn(),
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::builder;
    use crate::node::{ServiceType, TestNode};
    use crate::variant::{Axis, ClassDescriptor, OptionClass, Universe, Variant};
    use std::sync::Arc;

    struct Gateway;
    impl TestNode for Gateway {
        fn config(&self, _ctx: &NodeContext<'_>) -> Vec<ConfigFragment> {
            vec![ConfigFragment::own(
                "---\napiVersion: ambassador/v0\nkind: Module\nname: ambassador\nconfig: {}\n",
            )]
        }
    }

    struct Simple;
    impl TestNode for Simple {
        fn config(&self, _ctx: &NodeContext<'_>) -> Vec<ConfigFragment> {
            vec![ConfigFragment::own(
                "---\napiVersion: ambassador/v0\nkind: Mapping\nname: {self.name}\nprefix: /{self.name}/\nservice: http://{self.target.path.k8s}\n",
            )]
        }
    }

    struct Canary;
    impl TestNode for Canary {
        fn config(&self, _ctx: &NodeContext<'_>) -> Vec<ConfigFragment> {
            vec![
                ConfigFragment::for_child(
                    "target",
                    "kind: Mapping\nname: {self.name}\nprefix: /{self.name}/\nservice: http://{self.target.path.k8s}\n",
                ),
                ConfigFragment::for_child(
                    "canary",
                    "kind: Mapping\nname: {self.name}-canary\nprefix: /{self.name}/\nservice: http://{self.canary.path.k8s}\nweight: {self.weight}\n",
                ),
            ]
        }
    }

    struct AuthModule;
    impl TestNode for AuthModule {
        fn config(&self, _ctx: &NodeContext<'_>) -> Vec<ConfigFragment> {
            vec![ConfigFragment::for_parent(
                "kind: AuthService\nname: {self.auth.path.k8s}\nauth_service: {self.auth.path.k8s}\nambassador_id: other\n",
            )]
        }
    }

    struct Cors;
    impl TestNode for Cors {
        fn config(&self, _ctx: &NodeContext<'_>) -> Vec<ConfigFragment> {
            vec![ConfigFragment::field("cors: { origins: \"*\" }")]
        }
    }

    struct Headers;
    impl TestNode for Headers {
        fn config(&self, ctx: &NodeContext<'_>) -> Vec<ConfigFragment> {
            vec![ConfigFragment::field(format!(
                "add_request_headers: {}",
                ctx.option_value().unwrap()
            ))]
        }
    }

    struct Broken;
    impl TestNode for Broken {
        fn config(&self, _ctx: &NodeContext<'_>) -> Vec<ConfigFragment> {
            vec![ConfigFragment::own("kind: Mapping\nprefix: /broken/\n")]
        }
    }

    fn universe() -> Universe {
        Universe::builder()
            .service(ServiceType::http())
            .option(OptionClass::new("cors", |_| Arc::new(Cors)))
            .option(OptionClass::new("add_request_headers", |_| Arc::new(Headers)).values([serde_json::json!({"foo": "bar"})]))
            .build()
    }

    fn tree(root: ClassDescriptor) -> NodeTree {
        builder::build(&root, &universe()).unwrap().remove(0)
    }

    fn gateway() -> ClassDescriptor {
        ClassDescriptor::gateway("plain", |_: &Variant| Arc::new(Gateway))
    }

    #[test]
    fn test_documents_rendered_and_grouped_by_owner() {
        let tree = tree(gateway().child(ClassDescriptor::mapping("simplemapping", |_| Arc::new(Simple))));
        let bundle = aggregate(&tree, &Environment::default()).unwrap();

        let owners: Vec<&str> = bundle.config.iter().map(|g| g.owner.as_str()).collect();
        assert_eq!(owners, vec!["plain", "plain-simplemapping-http"]);

        let mapping = &bundle.group("plain-simplemapping-http").unwrap().documents[0];
        assert_eq!(mapping["name"], Value::from("simplemapping-http"));
        assert_eq!(mapping["prefix"], Value::from("/simplemapping-http/"));
        assert_eq!(
            mapping["service"],
            Value::from("http://plain-simplemapping-http-http")
        );
        assert_eq!(mapping["ambassador_id"], Value::from("plain"));
    }

    #[test]
    fn test_child_owned_documents() {
        let canary = ClassDescriptor::mapping("canarymapping", |_| Arc::new(Canary))
            .service("target")
            .service_named("canary", "canary")
            .axis(Axis::Services)
            .axis(Axis::scalar("weight", [10]));
        let tree = tree(gateway().child(canary));
        let bundle = aggregate(&tree, &Environment::default()).unwrap();

        let canary_group = bundle.group("plain-canarymapping-http-10-canary").unwrap();
        assert_eq!(canary_group.documents[0]["weight"], Value::from(10));
        assert_eq!(
            canary_group.documents[0]["name"],
            Value::from("canarymapping-http-10-canary")
        );
        assert!(bundle.group("plain-canarymapping-http-10-http").is_some());
        assert!(bundle.group("plain-canarymapping-http-10").is_none());
    }

    #[test]
    fn test_parent_owned_document_keeps_explicit_ambassador_id() {
        let auth = ClassDescriptor::mapping("authtest", |_| Arc::new(AuthModule))
            .service("auth")
            .axis(Axis::Services);
        let tree = tree(gateway().child(auth));
        let bundle = aggregate(&tree, &Environment::default()).unwrap();

        let gateway_docs = &bundle.group("plain").unwrap().documents;
        assert_eq!(gateway_docs.len(), 2);
        assert_eq!(gateway_docs[1]["kind"], Value::from("AuthService"));
        assert_eq!(gateway_docs[1]["ambassador_id"], Value::from("other"));
    }

    #[test]
    fn test_option_fields_merged_into_parent_mapping() {
        let simple = ClassDescriptor::mapping("simplemapping", |_| Arc::new(Simple))
            .axis(Axis::Services)
            .axis(Axis::Options);
        let tree = tree(gateway().child(simple));
        let bundle = aggregate(&tree, &Environment::default()).unwrap();

        let bare = &bundle.group("plain-simplemapping-http").unwrap().documents[0];
        assert!(bare.get("cors").is_none());

        let all = &bundle.group("plain-simplemapping-http-all").unwrap().documents[0];
        assert_eq!(all["cors"]["origins"], Value::from("*"));
        assert_eq!(all["add_request_headers"]["foo"], Value::from("bar"));
    }

    #[test]
    fn test_missing_name_rejected() {
        let tree = tree(gateway().child(ClassDescriptor::mapping("broken", |_| Arc::new(Broken))));
        let err = aggregate(&tree, &Environment::default()).unwrap_err();
        assert!(matches!(err, AggregationError::MissingField { field: "name", .. }));
    }

    #[test]
    fn test_unresolved_placeholder_rejected() {
        let tree = tree(gateway().child(ClassDescriptor::mapping("authtest", |_| Arc::new(AuthModule))));
        let err = aggregate(&tree, &Environment::default()).unwrap_err();
        assert!(matches!(err, AggregationError::Template { .. }));
    }

    #[test]
    fn test_manifests_in_depth_first_order() {
        let mut env = Environment::default();
        env.gateway_image = "gateway:test".to_string();
        let tree = tree(gateway().child(ClassDescriptor::mapping("simplemapping", |_| Arc::new(Simple))));
        let bundle = aggregate(&tree, &env).unwrap();

        let owners: Vec<&str> = bundle.manifests.iter().map(|m| m.owner.as_str()).collect();
        assert_eq!(owners, vec!["plain", "plain-simplemapping-http-http"]);
        assert!(bundle.manifests[0].text.contains("image: gateway:test"));
        assert!(bundle.manifests[1].text.contains("value: plain-simplemapping-http-http"));
    }

    #[test]
    fn test_render_is_a_yaml_stream() {
        let tree = tree(gateway().child(ClassDescriptor::mapping("simplemapping", |_| Arc::new(Simple))));
        let rendered = aggregate(&tree, &Environment::default()).unwrap().render().unwrap();

        let kinds: Vec<String> = serde_yaml::Deserializer::from_str(&rendered)
            .map(|d| Value::deserialize(d).unwrap())
            .filter_map(|v| v.get("kind").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert_eq!(
            kinds,
            vec!["Service", "Pod", "Service", "Pod", "ConfigMap", "ConfigMap"]
        );
    }
}
