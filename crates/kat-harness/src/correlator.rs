//! Result correlation.
//!
//! Results arrive from the scheduler in completion order. The store slots
//! each one back to the `(node, query index)` that declared it, so a node's
//! results line up positionally with its queries. Nodes reach their
//! parent's and children's results through a [`ResultView`] over the same
//! store; nothing is copied.

use crate::node::{NodeId, NodeRole, NodeTree};
use crate::result::QueryResult;
use crate::scheduler::PlannedQuery;
use std::collections::BTreeMap;
use std::ops::Deref;
use std::time::Instant;
use tracing::warn;

/// Every result of one deployment, indexed by node and query position.
#[derive(Debug, Default)]
pub struct ResultStore {
    by_node: BTreeMap<NodeId, Vec<QueryResult>>,
}

impl ResultStore {
    /// Slot `results` against `planned`.
    ///
    /// A planned query without a result gets a failed one, and a result
    /// nobody planned is dropped, so every node ends up with exactly one
    /// result per declared query.
    pub fn correlate(planned: &[PlannedQuery], results: Vec<QueryResult>) -> Self {
        let mut slots: BTreeMap<NodeId, Vec<Option<QueryResult>>> = BTreeMap::new();
        for query in planned {
            let node = slots.entry(query.node).or_default();
            if node.len() <= query.index {
                node.resize_with(query.index + 1, || None);
            }
        }

        for result in results {
            match slots
                .get_mut(&result.node)
                .and_then(|node| node.get_mut(result.index))
            {
                Some(slot) if slot.is_none() => *slot = Some(result),
                _ => warn!(
                    target: "kat.correlator",
                    node = result.node.index(),
                    index = result.index,
                    "Dropping unplanned or duplicate result"
                ),
            }
        }

        let now = Instant::now();
        let mut by_node = BTreeMap::new();
        for query in planned {
            let filled = slots
                .get_mut(&query.node)
                .and_then(|node| node.get_mut(query.index))
                .and_then(Option::take)
                .unwrap_or_else(|| {
                    QueryResult::failed(query.node, query.index, query.query.clone(), "no result recorded", 0, now)
                });
            by_node.entry(query.node).or_insert_with(Vec::new).push(filled);
        }

        for results in by_node.values_mut() {
            results.sort_by_key(|r| r.index);
        }
        Self { by_node }
    }

    /// Results of `node`, in declaration order.
    pub fn results(&self, node: NodeId) -> &[QueryResult] {
        self.by_node.get(&node).map(Vec::as_slice).unwrap_or_default()
    }

    /// Total number of results across all nodes.
    pub fn len(&self) -> usize {
        self.by_node.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryResult> {
        self.by_node.values().flatten()
    }
}

/// One node's results, with navigation to related nodes' results.
///
/// Dereferences to the node's results slice, so `view[0]`, `view.last()`
/// and `view.iter()` work directly.
#[derive(Clone, Copy)]
pub struct ResultView<'a> {
    store: &'a ResultStore,
    tree: &'a NodeTree,
    node: NodeId,
}

impl<'a> ResultView<'a> {
    pub fn new(store: &'a ResultStore, tree: &'a NodeTree, node: NodeId) -> Self {
        Self { store, tree, node }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn results(&self) -> &'a [QueryResult] {
        self.store.results(self.node)
    }

    fn at(&self, node: NodeId) -> ResultView<'a> {
        ResultView {
            store: self.store,
            tree: self.tree,
            node,
        }
    }

    /// The parent's results (e.g. an option inspecting the mapping it decorates).
    pub fn parent(&self) -> Option<ResultView<'a>> {
        self.tree
            .get(self.node)
            .and_then(|n| n.parent())
            .map(|p| self.at(p))
    }

    /// Results of the child with `label`.
    pub fn child(&self, label: &str) -> Option<ResultView<'a>> {
        self.tree
            .children(self.node)
            .find(|c| c.label() == Some(label))
            .map(|c| self.at(c.id()))
    }

    pub fn children(&self) -> Vec<ResultView<'a>> {
        self.tree.children(self.node).map(|c| self.at(c.id())).collect()
    }

    /// Results of option children, in composition order.
    pub fn options(&self) -> Vec<ResultView<'a>> {
        self.tree
            .children(self.node)
            .filter(|c| c.role() == NodeRole::Option)
            .map(|c| self.at(c.id()))
            .collect()
    }
}

impl Deref for ResultView<'_> {
    type Target = [QueryResult];

    fn deref(&self) -> &Self::Target {
        self.results()
    }
}

impl std::fmt::Debug for ResultView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultView")
            .field("node", &self.node)
            .field("results", &self.results().len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::builder;
    use crate::node::{ServiceType, TestNode};
    use crate::query::Query;
    use crate::transport::Exchange;
    use crate::variant::{Axis, ClassDescriptor, OptionClass, Universe};
    use std::sync::Arc;

    struct Inert;
    impl TestNode for Inert {}

    fn planned(node: usize, index: usize) -> PlannedQuery {
        PlannedQuery {
            node: NodeId(node),
            index,
            query: Query::new(format!("http://plain/{node}/{index}")),
        }
    }

    fn completed(planned: &PlannedQuery, status: u16) -> QueryResult {
        QueryResult::completed(
            planned.node,
            planned.index,
            planned.query.clone(),
            Exchange::new(status),
            1,
            Instant::now(),
        )
    }

    #[test]
    fn test_results_slotted_in_declaration_order() {
        let planned = vec![planned(1, 0), planned(1, 1), planned(1, 2), planned(2, 0)];
        let results = vec![
            completed(&planned[2], 202),
            completed(&planned[3], 200),
            completed(&planned[0], 200),
            completed(&planned[1], 201),
        ];

        let store = ResultStore::correlate(&planned, results);
        let statuses: Vec<Option<u16>> = store.results(NodeId(1)).iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![Some(200), Some(201), Some(202)]);
        assert_eq!(store.results(NodeId(2)).len(), 1);
        assert_eq!(store.len(), planned.len());
    }

    #[test]
    fn test_missing_results_become_failures() {
        let planned = vec![planned(1, 0), planned(1, 1)];
        let store = ResultStore::correlate(&planned, vec![completed(&planned[1], 200)]);

        let results = store.results(NodeId(1));
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].error.as_deref(), Some("no result recorded"));
        assert_eq!(results[0].query, planned[0].query);
        assert!(results[1].status_ok());
    }

    #[test]
    fn test_unplanned_and_duplicate_results_dropped() {
        let planned = vec![planned(1, 0)];
        let stray = completed(&self::planned(9, 0), 200);
        let results = vec![completed(&planned[0], 200), completed(&planned[0], 500), stray];

        let store = ResultStore::correlate(&planned, results);
        assert_eq!(store.len(), 1);
        assert_eq!(store.results(NodeId(1))[0].status, Some(200));
        assert!(store.results(NodeId(9)).is_empty());
    }

    #[test]
    fn test_view_navigates_without_copying() {
        let universe = Universe::builder()
            .service(ServiceType::http())
            .option(OptionClass::new("cors", |_| Arc::new(Inert)))
            .build();
        let root = ClassDescriptor::gateway("plain", |_| Arc::new(Inert)).child(
            ClassDescriptor::mapping("simplemapping", |_| Arc::new(Inert))
                .axis(Axis::Services)
                .axis(Axis::Options),
        );
        let tree = builder::build(&root, &universe).unwrap().remove(0);

        // plain(0) -> simplemapping-http(1) -> http(2); simplemapping-http-cors(3) -> http(4), cors(5)
        let planned = vec![planned(3, 0), planned(5, 0), planned(5, 1)];
        let results = planned.iter().map(|p| completed(p, 200)).collect();
        let store = ResultStore::correlate(&planned, results);

        let option = ResultView::new(&store, &tree, NodeId(5));
        assert_eq!(option.len(), 2);

        let parent = option.parent().unwrap();
        assert_eq!(parent.node(), NodeId(3));
        assert_eq!(parent.len(), 1);
        assert!(std::ptr::eq(parent.results(), store.results(NodeId(3))));

        assert_eq!(parent.options().len(), 1);
        assert_eq!(parent.child("cors").unwrap().len(), 2);
        assert!(parent.child("target").unwrap().is_empty());
    }
}
