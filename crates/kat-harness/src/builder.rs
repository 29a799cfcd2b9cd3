//! Node tree construction.
//!
//! Turns the expansions of one root class into one [`NodeTree`] per root
//! variant. Nodes are laid out in depth-first pre-order: a node, then its
//! service nodes, then its option nodes, then its child classes.

use crate::errors::ExpansionError;
use crate::node::{Node, NodeId, NodePath, NodeRole, NodeTree};
use crate::services::ServiceNode;
use crate::variant::{self, ClassDescriptor, Expansion, Universe};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Build one tree per variant of `root`.
pub fn build(root: &ClassDescriptor, universe: &Universe) -> Result<Vec<NodeTree>, ExpansionError> {
    if root.role() != NodeRole::Gateway {
        return Err(ExpansionError::NotAGateway {
            class: root.kind().to_string(),
        });
    }

    let expansions = variant::expand_tree(root, universe)?;
    let mut trees = Vec::with_capacity(expansions.len());

    for expansion in &expansions {
        let mut builder = TreeBuilder::default();
        builder.add(expansion, None, None)?;
        debug!(
            root = %expansion.variant.name(),
            nodes = builder.tree.len(),
            "Built node tree"
        );
        trees.push(builder.tree);
    }
    Ok(trees)
}

#[derive(Default)]
struct TreeBuilder {
    tree: NodeTree,
    names: BTreeSet<String>,
}

impl TreeBuilder {
    fn add(
        &mut self,
        expansion: &Expansion,
        parent: Option<(NodeId, &NodePath, &str)>,
        label: Option<String>,
    ) -> Result<NodeId, ExpansionError> {
        let variant = &expansion.variant;
        let class = &expansion.class;

        let path = match parent {
            Some((_, parent_path, _)) => parent_path.child(variant.name()),
            None => NodePath::root(variant.name()),
        };
        let ambassador_id = class
            .ambassador_id_override()
            .map(str::to_string)
            .or_else(|| parent.map(|(_, _, id)| id.to_string()))
            .unwrap_or_else(|| path.k8s());

        let id = self.push(Node {
            id: NodeId(0),
            kind: variant.kind().to_string(),
            name: variant.name().to_string(),
            role: class.role(),
            label,
            parent: parent.map(|(id, _, _)| id),
            children: Vec::new(),
            path: path.clone(),
            ambassador_id: ambassador_id.clone(),
            service: variant.service_type().cloned(),
            option: None,
            params: variant.params().clone(),
            labels: variant.labels().clone(),
            behavior: class.behavior(variant),
        })?;

        for (slot, service) in variant.services() {
            self.push(Node {
                id: NodeId(0),
                kind: service.kind().to_string(),
                name: service.name().to_string(),
                role: NodeRole::Service,
                label: Some(slot.clone()),
                parent: Some(id),
                children: Vec::new(),
                path: path.child(service.name()),
                ambassador_id: ambassador_id.clone(),
                service: Some(service.clone()),
                option: None,
                params: BTreeMap::new(),
                labels: BTreeMap::new(),
                behavior: Arc::new(ServiceNode),
            })?;
        }

        for option in variant.options() {
            self.push(Node {
                id: NodeId(0),
                kind: option.kind().to_string(),
                name: option.name().to_string(),
                role: NodeRole::Option,
                label: Some(option.kind().to_string()),
                parent: Some(id),
                children: Vec::new(),
                path: path.child(option.name()),
                ambassador_id: ambassador_id.clone(),
                service: None,
                option: Some(option.clone()),
                params: BTreeMap::new(),
                labels: BTreeMap::new(),
                behavior: option.behavior(),
            })?;
        }

        for child in &expansion.children {
            let label = child.class.kind().to_string();
            self.add(child, Some((id, &path, &ambassador_id)), Some(label))?;
        }

        Ok(id)
    }

    fn push(&mut self, node: Node) -> Result<NodeId, ExpansionError> {
        let k8s = node.path.k8s();
        if !self.names.insert(k8s.clone()) {
            let root = self.tree.root().map(|r| r.name.clone()).unwrap_or_else(|| node.name.clone());
            return Err(ExpansionError::DuplicateNode { root, name: k8s });
        }
        Ok(self.tree.push(node))
    }
}
