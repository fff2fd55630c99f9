//! Logical grouping of created resources.
//!
//! Every resource may name a parent when it is declared. The parent is a
//! non-owning back-reference: it groups resources for display and teardown,
//! and never orders creation. A child may therefore be created before its
//! parent, and the tree is assembled from whatever finished.

use std::collections::BTreeMap;

use petgraph::graph::NodeIndex;

use crate::core::ResourceKind;

/// A single created resource.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub name: String,
    pub kind: ResourceKind,
    pub identity: String,
}

#[derive(Clone, Debug)]
struct Node {
    entry: Entry,
    parent: Option<NodeIndex>,
}

/// The resources created by a run, grouped by their declared parents.
#[derive(Clone, Debug, Default)]
pub struct OwnershipTree {
    nodes: BTreeMap<NodeIndex, Node>,
    names: BTreeMap<String, NodeIndex>,
}

impl OwnershipTree {
    pub(crate) fn insert(&mut self, index: NodeIndex, parent: Option<NodeIndex>, entry: Entry) {
        self.names.insert(entry.name.clone(), index);
        self.nodes.insert(index, Node { entry, parent });
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        let index = self.names.get(name)?;
        self.nodes.get(index).map(|node| &node.entry)
    }

    /// The parent of `name`, if both exist in the tree.
    pub fn parent(&self, name: &str) -> Option<&Entry> {
        let index = self.names.get(name)?;
        let parent = self.nodes.get(index)?.parent?;
        self.nodes.get(&parent).map(|node| &node.entry)
    }

    /// Children of `name`, in declaration order.
    pub fn children(&self, name: &str) -> Vec<&Entry> {
        match self.names.get(name) {
            Some(index) => self.children_of(*index).map(|(_, entry)| entry).collect(),
            None => Vec::new(),
        }
    }

    /// Entries without a parent in the tree, in declaration order.
    pub fn roots(&self) -> Vec<&Entry> {
        self.nodes
            .values()
            .filter(|node| !self.has_parent(node))
            .map(|node| &node.entry)
            .collect()
    }

    /// Every entry, children before their parents. Deleting resources in this
    /// order never removes a group while something still belongs to it.
    pub fn teardown_order(&self) -> Vec<&Entry> {
        let mut acc = Vec::with_capacity(self.nodes.len());

        for (index, node) in &self.nodes {
            if !self.has_parent(node) {
                self.post_order(*index, &mut acc);
            }
        }

        acc
    }

    fn has_parent(&self, node: &Node) -> bool {
        node.parent
            .is_some_and(|parent| self.nodes.contains_key(&parent))
    }

    fn children_of(&self, parent: NodeIndex) -> impl Iterator<Item = (NodeIndex, &Entry)> {
        self.nodes
            .iter()
            .filter(move |(_, node)| node.parent == Some(parent))
            .map(|(index, node)| (*index, &node.entry))
    }

    fn post_order<'a>(&'a self, index: NodeIndex, acc: &mut Vec<&'a Entry>) {
        let children: Vec<_> = self.children_of(index).map(|(child, _)| child).collect();
        for child in children {
            self.post_order(child, acc);
        }
        if let Some(node) = self.nodes.get(&index) {
            acc.push(&node.entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, kind: ResourceKind) -> Entry {
        Entry {
            name: name.into(),
            kind,
            identity: format!("{name}-id"),
        }
    }

    fn sample() -> OwnershipTree {
        let mut tree = OwnershipTree::default();
        let root = NodeIndex::new(0);
        // children may be recorded before their parent
        tree.insert(NodeIndex::new(2), Some(root), entry("bucket", ResourceKind::Bucket));
        tree.insert(NodeIndex::new(3), Some(NodeIndex::new(2)), entry("keys", ResourceKind::BucketObject));
        tree.insert(root, None, entry("kind-aws", ResourceKind::Component));
        tree.insert(NodeIndex::new(1), Some(root), entry("cluster", ResourceKind::Cluster));
        tree
    }

    #[test]
    fn test_parents_and_children() {
        let tree = sample();

        assert_eq!(tree.len(), 4);
        assert_eq!(tree.parent("keys").map(|e| e.name.as_str()), Some("bucket"));
        assert!(tree.parent("kind-aws").is_none());

        let children: Vec<_> = tree.children("kind-aws").iter().map(|e| e.name.as_str()).collect();
        assert_eq!(children, ["cluster", "bucket"]);
    }

    #[test]
    fn test_roots_ignore_missing_parents() {
        let mut tree = OwnershipTree::default();
        tree.insert(NodeIndex::new(5), Some(NodeIndex::new(9)), entry("orphan", ResourceKind::Role));

        let roots: Vec<_> = tree.roots().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(roots, ["orphan"]);
    }

    #[test]
    fn test_teardown_removes_children_first() {
        let tree = sample();
        let order: Vec<_> = tree.teardown_order().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(order, ["cluster", "keys", "bucket", "kind-aws"]);
    }
}
